use std::{collections::BTreeMap, sync::Arc};

use compose_env_core::{
    ContainerRuntime, ContainerStatus, ContainerSummary, RuntimeError, ServiceDefinition,
    derive_status,
};
use tracing::info;

use crate::docker::platform::resolve_host;

/// Errors resolving the host/port pairs of a container.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("network {network} not found for container {container}")]
    NetworkNotFound { container: String, network: String },
    #[error("no ports found for container {container}")]
    NoPorts { container: String },
    #[error("container {container} publishes {count} ports, expected exactly one")]
    MultiplePorts { container: String, count: usize },
}

/// Reachable host plus container port to published host ports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub host: String,
    pub ports: BTreeMap<u16, Vec<u16>>,
}

/// View over one compose-managed container, captured when it was looked up.
#[derive(Clone)]
pub struct ContainerHandle {
    runtime: Arc<dyn ContainerRuntime>,
    summary: ContainerSummary,
    service: String,
    network: String,
    host_override: Option<String>,
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("service", &self.service)
            .field("container", &self.summary.display_name())
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl ContainerHandle {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn name(&self) -> &str {
        self.summary.display_name()
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub const fn summary(&self) -> &ContainerSummary {
        &self.summary
    }

    /// Inspect the live container and derive its status.
    pub async fn status(&self) -> ContainerStatus {
        let inspection = self.runtime.inspect(&self.summary.id).await;
        derive_status(self.name(), inspection)
    }

    /// Published ports on the service network, optionally restricted to the
    /// given container ports (empty means all).
    pub fn endpoints(&self, private_ports: &[u16]) -> Result<Endpoints, EndpointError> {
        let container = self.name().to_owned();
        let gateway = self
            .summary
            .networks
            .get(&self.network)
            .ok_or_else(|| EndpointError::NetworkNotFound {
                container: container.clone(),
                network: self.network.clone(),
            })?;
        if self.summary.ports.is_empty() {
            return Err(EndpointError::NoPorts { container });
        }

        let mut ports: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
        for port in &self.summary.ports {
            if !private_ports.is_empty() && !private_ports.contains(&port.private_port) {
                continue;
            }
            let Some(public) = port.public_port else {
                continue;
            };
            let published = ports.entry(port.private_port).or_default();
            // IPv4 and IPv6 bindings list the same host port twice.
            if !published.contains(&public) {
                published.push(public);
            }
        }

        let host = resolve_host(self.host_override.as_deref(), gateway.as_deref());
        info!(container, host, ports = ?ports, "resolved container endpoints");

        Ok(Endpoints { host, ports })
    }

    /// The single published port of the container.
    pub fn endpoint(&self) -> Result<(String, u16), EndpointError> {
        let endpoints = self.endpoints(&[])?;
        let published: Vec<u16> = endpoints.ports.into_values().flatten().collect();

        match published.as_slice() {
            [port] => Ok((endpoints.host, *port)),
            [] => Err(EndpointError::NoPorts {
                container: self.name().to_owned(),
            }),
            _ => Err(EndpointError::MultiplePorts {
                container: self.name().to_owned(),
                count: published.len(),
            }),
        }
    }

    pub async fn logs(&self) -> Result<String, RuntimeError> {
        self.runtime.logs(&self.summary.id).await
    }

    /// Run `sh -c command` in the container, returning its output lines.
    pub async fn exec(&self, command: &str) -> Result<Vec<String>, RuntimeError> {
        self.runtime.exec(&self.summary.id, command).await
    }

    /// Print the container's logs and last inspected state to stderr.
    pub async fn dump_diagnostics(&self) {
        let name = self.name();
        match self.logs().await {
            Ok(logs) => {
                eprintln!("[compose-env] ==================== {name} logs ====================");
                eprintln!("{logs}");
            }
            Err(err) => eprintln!("[compose-env] failed to fetch logs for {name}: {err}"),
        }

        match self.runtime.inspect(&self.summary.id).await {
            Ok(state) => {
                let rendered = serde_json::to_string_pretty(&state)
                    .unwrap_or_else(|err| format!("<unserializable state: {err}>"));
                eprintln!("[compose-env] ==================== {name} state ====================");
                eprintln!("{rendered}");
            }
            Err(err) => eprintln!("[compose-env] failed to inspect {name}: {err}"),
        }
    }
}

/// Finds the container backing a service by label and name.
#[derive(Clone)]
pub struct ContainerLocator {
    runtime: Arc<dyn ContainerRuntime>,
    label: String,
    default_network: String,
    host_override: Option<String>,
}

impl ContainerLocator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        label: impl Into<String>,
        default_network: impl Into<String>,
        host_override: Option<String>,
    ) -> Self {
        Self {
            runtime,
            label: label.into(),
            default_network: default_network.into(),
            host_override,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// `None` when the service has no container yet; more than one match is
    /// an error.
    pub async fn find(
        &self,
        service: &ServiceDefinition,
    ) -> Result<Option<ContainerHandle>, RuntimeError> {
        let mut containers = self
            .runtime
            .list_containers(&self.label, service.name())
            .await?;

        match containers.len() {
            0 => Ok(None),
            1 => Ok(containers.pop().map(|summary| ContainerHandle {
                runtime: Arc::clone(&self.runtime),
                summary,
                service: service.name().to_owned(),
                network: service.network_or(&self.default_network).to_owned(),
                host_override: self.host_override.clone(),
            })),
            count => Err(RuntimeError::AmbiguousContainer {
                service: service.name().to_owned(),
                count,
            }),
        }
    }
}
