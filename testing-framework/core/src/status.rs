use std::fmt;

use crate::runtime::{ContainerInspection, RuntimeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Error,
    Running,
    Exited,
    Unhealthy,
    NotReady,
}

impl StatusCode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Unhealthy => "unhealthy",
            Self::NotReady => "not ready",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("failed to inspect container {container}: {source}")]
    Inspect {
        container: String,
        #[source]
        source: RuntimeError,
    },
    #[error("container {container} exited with error code {exit_code}. details: {details}")]
    ExitCode {
        container: String,
        exit_code: i64,
        details: String,
    },
}

/// Status of a container at one point in time.
#[derive(Debug)]
pub enum ContainerStatus {
    Error(StatusError),
    Running,
    Exited,
    /// Running but failing its health check; carries the latest probe
    /// output.
    Unhealthy(String),
    NotReady,
}

impl ContainerStatus {
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::Error(_) => StatusCode::Error,
            Self::Running => StatusCode::Running,
            Self::Exited => StatusCode::Exited,
            Self::Unhealthy(_) => StatusCode::Unhealthy,
            Self::NotReady => StatusCode::NotReady,
        }
    }

    /// States a poller should wait out rather than act on.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unhealthy(_) | Self::NotReady)
    }

    pub const fn error(&self) -> Option<&StatusError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "error: {err}"),
            Self::Unhealthy(diagnostic) => write!(f, "unhealthy: {diagnostic}"),
            other => f.write_str(other.code().label()),
        }
    }
}

/// Derive a status from an inspect result. The first matching rule wins:
///
/// 1. inspect failed: `Error`
/// 2. stopped with a non-zero exit code: `Error`
/// 3. stopped with state `exited`: `Exited`
/// 4. stopped otherwise: `NotReady`
/// 5. running without a health check: `Running`
/// 6. running and `healthy`: `Running`
/// 7. running and not `unhealthy`: `NotReady`
/// 8. running and `unhealthy`: `Unhealthy`
pub fn derive_status(
    container: &str,
    inspection: Result<ContainerInspection, RuntimeError>,
) -> ContainerStatus {
    let state = match inspection {
        Ok(state) => state,
        Err(source) => {
            return ContainerStatus::Error(StatusError::Inspect {
                container: container.to_owned(),
                source,
            });
        }
    };

    if !state.running {
        if state.exit_code != 0 {
            return ContainerStatus::Error(StatusError::ExitCode {
                container: container.to_owned(),
                exit_code: state.exit_code,
                details: state.error.unwrap_or_default(),
            });
        }
        if state.status.eq_ignore_ascii_case("exited") {
            return ContainerStatus::Exited;
        }
        return ContainerStatus::NotReady;
    }

    let Some(health) = state.health else {
        return ContainerStatus::Running;
    };

    if health.status.eq_ignore_ascii_case("healthy") {
        return ContainerStatus::Running;
    }
    if !health.status.eq_ignore_ascii_case("unhealthy") {
        return ContainerStatus::NotReady;
    }

    let diagnostic = health.log.last().map_or_else(
        || format!("unhealthy status for container {container}. no health-check output recorded"),
        |check| {
            format!(
                "unhealthy status for container {container}. exit code: {}, health-check output: {}",
                check.exit_code,
                check.output.trim_end()
            )
        },
    );
    ContainerStatus::Unhealthy(diagnostic)
}
