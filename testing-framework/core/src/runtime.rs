use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

/// Failures talking to the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime is not reachable: {source}")]
    Unavailable {
        #[source]
        source: anyhow::Error,
    },
    #[error("no such container: {id}")]
    NotFound { id: String },
    #[error("expected at most one container for service {service}, found {count}")]
    AmbiguousContainer { service: String, count: usize },
    #[error("container runtime request failed: {source}")]
    Api {
        #[source]
        source: anyhow::Error,
    },
}

impl RuntimeError {
    pub fn api(source: impl Into<anyhow::Error>) -> Self {
        Self::Api {
            source: source.into(),
        }
    }
}

/// One port mapping as reported by a container listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PublishedPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub host_ip: Option<String>,
}

/// Listing entry for a container, captured at lookup time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub ports: Vec<PublishedPort>,
    /// Attached networks keyed by name, with the network gateway if known.
    pub networks: BTreeMap<String, Option<String>>,
}

impl ContainerSummary {
    /// First listed name without the leading `/` docker adds.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map_or(self.id.as_str(), |name| name.trim_start_matches('/'))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheckResult {
    pub exit_code: i64,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthState {
    /// Lower-case health status (`starting`, `healthy`, `unhealthy`).
    pub status: String,
    /// Health-check probes, oldest first.
    pub log: Vec<HealthCheckResult>,
}

/// Live state of a container as reported by an inspect call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerInspection {
    pub running: bool,
    pub exit_code: i64,
    /// Lower-case state string (`created`, `running`, `exited`, ...).
    pub status: String,
    pub error: Option<String>,
    /// `None` when the image declares no health check.
    pub health: Option<HealthState>,
}

impl ContainerInspection {
    #[must_use]
    pub fn running() -> Self {
        Self {
            running: true,
            exit_code: 0,
            status: "running".to_owned(),
            error: None,
            health: None,
        }
    }

    #[must_use]
    pub fn exited(exit_code: i64) -> Self {
        Self {
            running: false,
            exit_code,
            status: "exited".to_owned(),
            error: None,
            health: None,
        }
    }

    #[must_use]
    pub fn with_health(mut self, status: &str, log: Vec<HealthCheckResult>) -> Self {
        self.health = Some(HealthState {
            status: status.to_owned(),
            log,
        });
        self
    }
}

/// Narrow view of the container runtime used by the engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers (running or not) carrying `label` whose name contains
    /// `name`.
    async fn list_containers(
        &self,
        label: &str,
        name: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError>;

    /// Combined stdout and stderr of the container.
    async fn logs(&self, id: &str) -> Result<String, RuntimeError>;

    /// Runs `sh -c command` inside the container and returns its output once
    /// the stream closes.
    async fn exec(&self, id: &str, command: &str) -> Result<Vec<String>, RuntimeError>;
}
