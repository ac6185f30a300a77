use std::collections::BTreeMap;

/// Compose-level description of one managed service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDefinition {
    name: String,
    environment: BTreeMap<String, String>,
    network: Option<String>,
}

impl ServiceDefinition {
    /// `name` must match the service key in the compose file.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: BTreeMap::new(),
            network: None,
        }
    }

    /// Variable exported to the compose process. Keys must be unique across
    /// all services of an environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Declared network, or `default` when the service relies on the
    /// project's implicit network.
    pub fn network_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.network.as_deref().unwrap_or(default)
    }
}
