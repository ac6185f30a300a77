use std::path::PathBuf;

use compose_env_core::{DynError, RuntimeError};

use crate::{docker::commands::ComposeCommandError, lifecycle::wait::AwaitStateError};

#[derive(Debug, thiserror::Error)]
/// Top-level errors surfaced by environment lifecycle calls.
pub enum ComposeEnvError {
    #[error("docker does not appear to be available on this host")]
    DockerUnavailable,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compose(#[from] ComposeCommandError),
    #[error(transparent)]
    Convergence(#[from] AwaitStateError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("before hook for service {service} failed: {source}")]
    BeforeHook {
        service: String,
        #[source]
        source: DynError,
    },
    #[error("handler for service {service} failed: {source}")]
    Handler {
        service: String,
        #[source]
        source: DynError,
    },
    #[error("no container found for service {service}")]
    MissingContainer { service: String },
    #[error("services {names:?} are not part of this environment")]
    UnmanagedService { names: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
/// Invalid environment configuration, detected before any container is
/// touched.
pub enum ConfigError {
    #[error("at least one compose file must be specified")]
    MissingComposeFiles,
    #[error("compose file not found at {}", path.display())]
    ComposeFileNotFound { path: PathBuf },
    #[error("compose command must name a program")]
    EmptyComposeCommand,
    #[error(
        "environment variable {key} is declared by both {first} and {second}; keys must be unique across services"
    )]
    DuplicateEnvVar {
        key: String,
        first: String,
        second: String,
    },
}
