use std::time::Duration;

/// Default ceiling for `up`/`start` including the convergence wait.
pub const DEFAULT_UP_TIMEOUT: Duration = Duration::from_secs(120);

/// Default ceiling for `down`/`stop` including the convergence wait.
pub const DEFAULT_DOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between container status checks while converging.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Label every compose-managed container carries.
pub const DEFAULT_LABEL: &str = "com.docker.compose.project";

/// Project name passed to `-p` unless overridden.
pub const DEFAULT_PROJECT_NAME: &str = "compose-env";

/// Compose front-end invoked for every lifecycle call.
pub const DEFAULT_COMPOSE_COMMAND: [&str; 2] = ["docker", "compose"];

/// Any value disables `shutdown` so containers survive across runs.
pub const NO_SHUTDOWN_ENV: &str = "COMPOSE_ENV_NO_SHUTDOWN";

/// Any value skips the clean `down` issued before the first `up`.
pub const NO_CLEANUP_ENV: &str = "COMPOSE_ENV_NO_CLEANUP";

/// Host used when building endpoints, overriding the platform heuristic.
pub const HOST_OVERRIDE_ENV: &str = "COMPOSE_ENV_HOST";

/// Whitespace separated compose command, e.g. `docker-compose`.
pub const COMPOSE_BIN_ENV: &str = "COMPOSE_ENV_BIN";

/// Network compose creates for a project when none is declared.
#[must_use]
pub fn default_network(project_name: &str) -> String {
    format!("{project_name}_default")
}
