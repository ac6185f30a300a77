pub mod commands;
pub mod platform;

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{ListContainersOptions, LogOutput, LogsOptions},
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    models::{ContainerInspectResponse, ContainerSummary as BollardSummary},
};
use compose_env_core::{
    ContainerInspection, ContainerRuntime, ContainerSummary, HealthCheckResult, HealthState,
    PublishedPort, RuntimeError, adjust_timeout,
};
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::ComposeEnvError;

const DOCKER_PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Checks that the docker daemon answers a ping within a timeout.
pub async fn ensure_docker_available() -> Result<(), ComposeEnvError> {
    DockerRuntime::connect()
        .await
        .map(|_| ())
        .map_err(|_| ComposeEnvError::DockerUnavailable)
}

/// [`ContainerRuntime`] backed by the local docker daemon.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket and verify
    /// the daemon responds.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|source| {
            RuntimeError::Unavailable {
                source: source.into(),
            }
        })?;

        match timeout(adjust_timeout(DOCKER_PING_TIMEOUT), docker.ping()).await {
            Ok(Ok(_)) => Ok(Self { docker }),
            Ok(Err(source)) => Err(RuntimeError::Unavailable {
                source: source.into(),
            }),
            Err(_) => Err(RuntimeError::Unavailable {
                source: anyhow::anyhow!("docker ping timed out"),
            }),
        }
    }

    #[must_use]
    pub const fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn map_error(id: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound { id: id.to_owned() },
        other => RuntimeError::api(other),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(
        &self,
        label: &str,
        name: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters: HashMap<String, Vec<String>> = [
            ("label".to_owned(), vec![label.to_owned()]),
            ("name".to_owned(), vec![name.to_owned()]),
        ]
        .into_iter()
        .collect();

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(RuntimeError::api)?;
        debug!(label, name, count = containers.len(), "listed containers");

        Ok(containers.into_iter().map(convert_summary).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|err| map_error(id, err))?;

        Ok(convert_inspection(response))
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_owned(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| map_error(id, err))?;
            output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
        }

        Ok(output)
    }

    async fn exec(&self, id: &str, command: &str) -> Result<Vec<String>, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(vec!["sh".to_owned(), "-c".to_owned(), command.to_owned()]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|err| map_error(id, err))?;
        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|err| map_error(id, err))?;

        let StartExecResults::Attached { mut output, .. } = started else {
            return Ok(Vec::new());
        };

        let mut buffer = String::new();
        while let Some(chunk) = output.next().await {
            match chunk.map_err(RuntimeError::api)? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    buffer.push_str(&String::from_utf8_lossy(&message));
                }
                _ => {}
            }
        }

        Ok(buffer.lines().map(str::to_owned).collect())
    }
}

fn convert_summary(summary: BollardSummary) -> ContainerSummary {
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|port| PublishedPort {
            private_port: port.private_port,
            public_port: port.public_port,
            host_ip: port.ip,
        })
        .collect();

    let networks = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| {
            let gateway = endpoint.gateway.filter(|gateway| !gateway.is_empty());
            (name, gateway)
        })
        .collect();

    ContainerSummary {
        id: summary.id.unwrap_or_default(),
        names: summary.names.unwrap_or_default(),
        ports,
        networks,
    }
}

fn convert_inspection(response: ContainerInspectResponse) -> ContainerInspection {
    let state = response.state.unwrap_or_default();

    let health = state.health.and_then(|health| {
        let status = health.status?.to_string();
        // Images without a HEALTHCHECK report `none` or an empty status.
        if status.is_empty() || status == "none" {
            return None;
        }
        let log = health
            .log
            .unwrap_or_default()
            .into_iter()
            .map(|probe| HealthCheckResult {
                exit_code: probe.exit_code.unwrap_or_default(),
                output: probe.output.unwrap_or_default(),
            })
            .collect();
        Some(HealthState { status, log })
    });

    ContainerInspection {
        running: state.running.unwrap_or(false),
        exit_code: state.exit_code.unwrap_or_default(),
        status: state
            .status
            .map(|status| status.to_string())
            .unwrap_or_default(),
        error: state.error.filter(|error| !error.is_empty()),
        health,
    }
}

#[cfg(test)]
mod tests {
    use bollard::models::{
        ContainerState, ContainerStateStatusEnum, ContainerSummaryNetworkSettings,
        EndpointSettings, Health, HealthStatusEnum, HealthcheckResult, Port,
    };

    use super::*;

    #[test]
    fn summary_keeps_ports_and_gateways() {
        let summary = BollardSummary {
            id: Some("abc".to_owned()),
            names: Some(vec!["/proj-redis-1".to_owned()]),
            ports: Some(vec![Port {
                ip: Some("0.0.0.0".to_owned()),
                private_port: 6379,
                public_port: Some(49153),
                typ: None,
            }]),
            network_settings: Some(ContainerSummaryNetworkSettings {
                networks: Some(HashMap::from([(
                    "proj_default".to_owned(),
                    EndpointSettings {
                        gateway: Some("172.18.0.1".to_owned()),
                        ..Default::default()
                    },
                )])),
            }),
            ..Default::default()
        };

        let converted = convert_summary(summary);

        assert_eq!(converted.display_name(), "proj-redis-1");
        assert_eq!(converted.ports[0].public_port, Some(49153));
        assert_eq!(
            converted.networks.get("proj_default"),
            Some(&Some("172.18.0.1".to_owned()))
        );
    }

    #[test]
    fn inspection_maps_state_and_health() {
        let response = ContainerInspectResponse {
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                running: Some(true),
                exit_code: Some(0),
                health: Some(Health {
                    status: Some(HealthStatusEnum::UNHEALTHY),
                    log: Some(vec![HealthcheckResult {
                        exit_code: Some(1),
                        output: Some("PONG missing".to_owned()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let inspection = convert_inspection(response);

        assert!(inspection.running);
        assert_eq!(inspection.status, "running");
        let health = inspection.health.expect("health present");
        assert_eq!(health.status, "unhealthy");
        assert_eq!(health.log[0].output, "PONG missing");
    }

    #[test]
    fn missing_health_check_is_none() {
        let response = ContainerInspectResponse {
            state: Some(ContainerState {
                status: Some(ContainerStateStatusEnum::EXITED),
                running: Some(false),
                exit_code: Some(0),
                error: Some(String::new()),
                health: Some(Health {
                    status: Some(HealthStatusEnum::NONE),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let inspection = convert_inspection(response);

        assert!(inspection.health.is_none());
        assert!(inspection.error.is_none());
        assert_eq!(inspection.status, "exited");
    }

    #[test]
    fn not_found_maps_to_typed_error() {
        let err = map_error(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_owned(),
            },
        );

        assert!(matches!(err, RuntimeError::NotFound { id } if id == "abc"));
    }
}
