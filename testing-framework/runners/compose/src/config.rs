use std::{env, path::PathBuf, time::Duration};

use compose_env_core::{
    adjust_timeout,
    constants::{
        COMPOSE_BIN_ENV, DEFAULT_COMPOSE_COMMAND, DEFAULT_DOWN_TIMEOUT, DEFAULT_LABEL,
        DEFAULT_PROJECT_NAME, DEFAULT_UP_TIMEOUT, HOST_OVERRIDE_ENV, NO_CLEANUP_ENV,
        NO_SHUTDOWN_ENV, default_network,
    },
};
use uuid::Uuid;

use crate::errors::ConfigError;

/// Settings shared by every service of one environment.
#[derive(Clone, Debug)]
pub struct EnvironmentConfig {
    compose_files: Vec<PathBuf>,
    up_timeout: Duration,
    down_timeout: Duration,
    label: String,
    project_name: String,
    compose_command: Vec<String>,
    host_override: Option<String>,
    no_cleanup: bool,
    no_shutdown: bool,
}

impl EnvironmentConfig {
    /// Start building a config for the given compose file(s).
    #[must_use]
    pub fn builder<I, P>(compose_files: I) -> EnvironmentConfigBuilder
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        EnvironmentConfigBuilder::new(compose_files.into_iter().map(Into::into).collect())
    }

    pub fn compose_files(&self) -> &[PathBuf] {
        &self.compose_files
    }

    pub const fn up_timeout(&self) -> Duration {
        self.up_timeout
    }

    pub const fn down_timeout(&self) -> Duration {
        self.down_timeout
    }

    /// Label used to find this environment's containers.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Docker `label` filter for this environment's containers. The default
    /// compose project label is narrowed to this project.
    pub fn label_filter(&self) -> String {
        if self.label == DEFAULT_LABEL {
            format!("{}={}", self.label, self.project_name)
        } else {
            self.label.clone()
        }
    }

    /// Compose project name (`-p`).
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn compose_command(&self) -> &[String] {
        &self.compose_command
    }

    pub fn host_override(&self) -> Option<&str> {
        self.host_override.as_deref()
    }

    pub const fn no_cleanup(&self) -> bool {
        self.no_cleanup
    }

    pub const fn no_shutdown(&self) -> bool {
        self.no_shutdown
    }

    /// Network services attach to unless they declare one.
    pub fn default_network(&self) -> String {
        default_network(&self.project_name)
    }
}

/// Builder for [`EnvironmentConfig`]; `build` validates the compose files.
#[derive(Clone, Debug)]
pub struct EnvironmentConfigBuilder {
    compose_files: Vec<PathBuf>,
    up_timeout: Duration,
    down_timeout: Duration,
    label: Option<String>,
    project_name: String,
    compose_command: Option<Vec<String>>,
    host_override: Option<String>,
    no_cleanup: bool,
    no_shutdown: bool,
}

impl EnvironmentConfigBuilder {
    fn new(compose_files: Vec<PathBuf>) -> Self {
        Self {
            compose_files,
            up_timeout: DEFAULT_UP_TIMEOUT,
            down_timeout: DEFAULT_DOWN_TIMEOUT,
            label: None,
            project_name: DEFAULT_PROJECT_NAME.to_owned(),
            compose_command: None,
            host_override: None,
            no_cleanup: false,
            no_shutdown: false,
        }
    }

    #[must_use]
    /// Ceiling for `up`/`start`, shared by the compose process and the
    /// convergence wait.
    pub const fn with_up_timeout(mut self, timeout: Duration) -> Self {
        self.up_timeout = timeout;
        self
    }

    #[must_use]
    /// Ceiling for `down`/`stop`, shared by the compose process and the
    /// convergence wait.
    pub const fn with_down_timeout(mut self, timeout: Duration) -> Self {
        self.down_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = project_name.into();
        self
    }

    #[must_use]
    /// Use a fresh `compose-env-<uuid>` project so parallel suites do not
    /// share containers.
    pub fn with_unique_project_name(mut self) -> Self {
        self.project_name = format!("{DEFAULT_PROJECT_NAME}-{}", Uuid::new_v4().simple());
        self
    }

    #[must_use]
    /// Program and leading arguments, e.g. `["docker-compose"]`.
    pub fn with_compose_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compose_command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    #[must_use]
    /// Do not issue the clean `down` before the first `up`.
    pub const fn skip_cleanup(mut self) -> Self {
        self.no_cleanup = true;
        self
    }

    #[must_use]
    /// Turn `shutdown` into a no-op, leaving containers up across runs.
    pub const fn disable_shutdown(mut self) -> Self {
        self.no_shutdown = true;
        self
    }

    /// Apply `COMPOSE_ENV_*` overrides from the process environment and
    /// validate.
    pub fn build(self) -> Result<EnvironmentConfig, ConfigError> {
        self.build_with_overrides(|key| env::var(key).ok())
    }

    fn build_with_overrides(
        self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<EnvironmentConfig, ConfigError> {
        if self.compose_files.is_empty() {
            return Err(ConfigError::MissingComposeFiles);
        }
        if let Some(path) = self.compose_files.iter().find(|path| !path.exists()) {
            return Err(ConfigError::ComposeFileNotFound { path: path.clone() });
        }

        let compose_command = match (self.compose_command, lookup(COMPOSE_BIN_ENV)) {
            (Some(command), _) => command,
            (None, Some(raw)) => raw.split_whitespace().map(str::to_owned).collect(),
            (None, None) => DEFAULT_COMPOSE_COMMAND.map(str::to_owned).to_vec(),
        };
        if compose_command.is_empty() {
            return Err(ConfigError::EmptyComposeCommand);
        }

        let host_override = self
            .host_override
            .or_else(|| lookup(HOST_OVERRIDE_ENV).filter(|host| !host.is_empty()));

        Ok(EnvironmentConfig {
            compose_files: self.compose_files,
            up_timeout: adjust_timeout(self.up_timeout),
            down_timeout: adjust_timeout(self.down_timeout),
            label: self.label.unwrap_or_else(|| DEFAULT_LABEL.to_owned()),
            project_name: self.project_name,
            compose_command,
            host_override,
            no_cleanup: self.no_cleanup || lookup(NO_CLEANUP_ENV).is_some(),
            no_shutdown: self.no_shutdown || lookup(NO_SHUTDOWN_ENV).is_some(),
        })
    }
}
