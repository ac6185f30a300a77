use std::{collections::BTreeMap, sync::Arc, time::Duration};

use compose_env_core::{ContainerRuntime, ServiceDefinition};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    config::EnvironmentConfig,
    container::{ContainerHandle, ContainerLocator},
    docker::commands::{ComposeCommandError, ComposeInvocation, run_compose_command},
    errors::{ComposeEnvError, ConfigError},
    lifecycle::{
        cleanup::BlockingTeardown,
        wait::{TargetState, await_state},
    },
};

const UP_ARGS: [&str; 3] = ["up", "-d", "--renew-anon-volumes"];
const START_ARGS: [&str; 2] = ["up", "-d"];
const STOP_ARGS: [&str; 3] = ["rm", "-s", "-f"];
const DOWN_ARGS: [&str; 2] = ["down", "-v"];

/// Drives the compose CLI for the managed services and waits for the result
/// to converge.
pub struct ComposeDriver {
    config: EnvironmentConfig,
    services: BTreeMap<String, ServiceDefinition>,
    locator: ContainerLocator,
}

impl ComposeDriver {
    pub fn new(config: EnvironmentConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let locator = ContainerLocator::new(
            runtime,
            config.label_filter(),
            config.default_network(),
            config.host_override().map(str::to_owned),
        );
        Self {
            config,
            services: BTreeMap::new(),
            locator,
        }
    }

    pub const fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Fails if adding `services` would declare one environment variable
    /// from two different services.
    pub fn check_services(&self, services: &[ServiceDefinition]) -> Result<(), ConfigError> {
        let replaced = |name: &str| services.iter().any(|service| service.name() == name);
        let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
        for service in self
            .services
            .values()
            .filter(|service| !replaced(service.name()))
            .chain(services)
        {
            for key in service.environment().keys() {
                match owners.insert(key, service.name()) {
                    Some(first) if first != service.name() => {
                        return Err(ConfigError::DuplicateEnvVar {
                            key: key.clone(),
                            first: first.to_owned(),
                            second: service.name().to_owned(),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Merge service definitions into the managed set, replacing any with
    /// the same name.
    pub fn add_services(&mut self, services: &[ServiceDefinition]) -> Result<(), ConfigError> {
        self.check_services(services)?;
        for service in services {
            self.services
                .insert(service.name().to_owned(), service.clone());
        }
        Ok(())
    }

    /// `up` every managed service, recreating anonymous volumes, then wait
    /// for all of them to run.
    pub async fn up(&self) -> Result<(), ComposeEnvError> {
        let names = self.managed_names();
        // A bare `up` would start every service in the compose files.
        if names.is_empty() {
            debug!(project = self.config.project_name(), "no managed services to bring up");
            return Ok(());
        }
        let remaining = self.run(&UP_ARGS, &names, self.config.up_timeout()).await?;
        self.wait(self.services.values().cloned().collect(), TargetState::Running, remaining)
            .await?;

        info!(services = ?names, project = self.config.project_name(), "brought up services");
        Ok(())
    }

    /// Register `services` and bring up only those.
    pub async fn start(&mut self, services: &[ServiceDefinition]) -> Result<(), ComposeEnvError> {
        if services.is_empty() {
            return Ok(());
        }
        self.add_services(services)?;

        let names: Vec<String> = services
            .iter()
            .map(|service| service.name().to_owned())
            .collect();
        let remaining = self
            .run(&START_ARGS, &names, self.config.up_timeout())
            .await?;
        self.wait(services.to_vec(), TargetState::Running, remaining)
            .await?;

        info!(services = ?names, project = self.config.project_name(), "started services");
        Ok(())
    }

    /// Force-remove the named containers and wait until none of them runs.
    pub async fn stop(&self, names: &[String]) -> Result<(), ComposeEnvError> {
        if names.is_empty() {
            return Ok(());
        }

        let remaining = self
            .run(&STOP_ARGS, names, self.config.down_timeout())
            .await?;
        let services = names.iter().map(|name| self.definition(name)).collect();
        self.wait(services, TargetState::Stopped, remaining).await?;

        info!(services = ?names, project = self.config.project_name(), "stopped services");
        Ok(())
    }

    /// Tear down the whole project including volumes.
    pub async fn down(&self) -> Result<(), ComposeEnvError> {
        let remaining = self
            .run(&DOWN_ARGS, &[], self.config.down_timeout())
            .await?;
        self.wait(self.services.values().cloned().collect(), TargetState::Stopped, remaining)
            .await?;

        info!(services = ?self.managed_names(), project = self.config.project_name(), "brought down services");
        Ok(())
    }

    /// Fresh lookup of the container currently backing `name`.
    pub async fn container(&self, name: &str) -> Result<Option<ContainerHandle>, ComposeEnvError> {
        Ok(self.locator.find(&self.definition(name)).await?)
    }

    /// Blocking `down -v` for use from `Drop`.
    pub fn teardown(&self) -> BlockingTeardown {
        BlockingTeardown::new(
            self.invocation().subcommand(DOWN_ARGS),
            self.config.down_timeout(),
        )
    }

    fn definition(&self, name: &str) -> ServiceDefinition {
        self.services
            .get(name)
            .cloned()
            .unwrap_or_else(|| ServiceDefinition::new(name))
    }

    fn managed_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    fn invocation(&self) -> ComposeInvocation {
        ComposeInvocation::new(
            self.config.compose_command(),
            self.config.compose_files(),
            self.config.project_name(),
        )
        .envs(
            self.services
                .values()
                .flat_map(|service| service.environment().iter()),
        )
    }

    /// Runs one compose call and returns what is left of `ceiling` for the
    /// convergence wait.
    async fn run(
        &self,
        args: &[&str],
        names: &[String],
        ceiling: Duration,
    ) -> Result<Duration, ComposeCommandError> {
        let invocation = self
            .invocation()
            .subcommand(args.iter().copied().chain(names.iter().map(String::as_str)));
        info!(
            command = invocation.description(),
            project = self.config.project_name(),
            services = ?names,
            "running compose"
        );

        let started = Instant::now();
        run_compose_command(&invocation, ceiling).await?;
        let elapsed = started.elapsed();
        let remaining = ceiling.saturating_sub(elapsed);

        debug!(
            command = invocation.description(),
            elapsed_ms = elapsed.as_millis(),
            remaining_ms = remaining.as_millis(),
            "compose finished"
        );
        Ok(remaining)
    }

    async fn wait(
        &self,
        services: Vec<ServiceDefinition>,
        target: TargetState,
        budget: Duration,
    ) -> Result<(), ComposeEnvError> {
        Ok(await_state(&self.locator, &services, target, budget).await?)
    }
}
