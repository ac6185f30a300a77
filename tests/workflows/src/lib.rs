//! Shared fixtures for the docker-backed workflow tests.

use std::{path::PathBuf, time::Duration};

use compose_env::{ConfigError, EnvironmentConfig};
use tracing_subscriber::EnvFilter;

pub const REDIS: &str = "redis";
pub const CACHE: &str = "cache";

/// Environment variable consumed by the `cache` service's compose definition.
pub const CACHE_PORT_ENV: &str = "CACHE_PORT";

pub fn compose_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/docker-compose.yml")
}

/// Config with a project name of its own so runs never share containers.
pub fn test_config() -> Result<EnvironmentConfig, ConfigError> {
    EnvironmentConfig::builder([compose_file()])
        .with_unique_project_name()
        .with_up_timeout(Duration::from_secs(90))
        .with_down_timeout(Duration::from_secs(60))
        .build()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
