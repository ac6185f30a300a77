pub mod constants;
pub mod runtime;
pub mod service;
pub mod status;

use std::{env, sync::LazyLock, time::Duration};

pub use runtime::{
    ContainerInspection, ContainerRuntime, ContainerSummary, HealthCheckResult, HealthState,
    PublishedPort, RuntimeError,
};
pub use service::ServiceDefinition;
pub use status::{ContainerStatus, StatusCode, StatusError, derive_status};

/// Boxed error returned by caller-supplied hooks and handlers.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

static IS_SLOW_TEST_ENV: LazyLock<bool> =
    LazyLock::new(|| env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true"));

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    scale_timeout(d, *IS_SLOW_TEST_ENV)
}

fn scale_timeout(d: Duration, slow: bool) -> Duration {
    if slow { d.saturating_mul(2) } else { d }
}
