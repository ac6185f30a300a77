pub mod compose;
pub mod config;
pub mod container;
pub mod docker;
pub mod environment;
pub mod errors;
pub mod lifecycle;

#[cfg(test)]
mod testing;

pub use compose::ComposeDriver;
pub use compose_env_core::{
    ContainerRuntime, ContainerStatus, DynError, ServiceDefinition, StatusCode,
};
pub use config::{EnvironmentConfig, EnvironmentConfigBuilder};
pub use container::{ContainerHandle, ContainerLocator, EndpointError, Endpoints};
pub use docker::{
    DockerRuntime,
    commands::{ComposeCommandError, ComposeInvocation, run_compose_command},
    ensure_docker_available,
    platform::resolve_host,
};
pub use environment::{Environment, ServiceEntry};
pub use errors::{ComposeEnvError, ConfigError};
pub use lifecycle::wait::{AwaitStateError, TargetState, WaitError, await_state};
