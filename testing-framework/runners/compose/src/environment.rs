use std::{collections::BTreeMap, future::Future, mem, sync::Arc};

use compose_env_core::{ContainerRuntime, DynError, ServiceDefinition};
use futures::{FutureExt as _, future::BoxFuture};
use tracing::{debug, info, warn};

use crate::{
    compose::ComposeDriver,
    config::EnvironmentConfig,
    container::ContainerHandle,
    docker::DockerRuntime,
    errors::ComposeEnvError,
};

type Handler<T> =
    Arc<dyn Fn(ContainerHandle) -> BoxFuture<'static, Result<T, DynError>> + Send + Sync>;
type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), DynError>> + Send + Sync>;

/// A service plus the caller code that runs around its lifecycle.
pub struct ServiceEntry<T> {
    definition: ServiceDefinition,
    handler: Handler<T>,
    before: Option<Hook>,
    after: Option<Hook>,
    dump_logs_on_shutdown: bool,
}

impl<T> Clone for ServiceEntry<T> {
    fn clone(&self) -> Self {
        Self {
            definition: self.definition.clone(),
            handler: Arc::clone(&self.handler),
            before: self.before.clone(),
            after: self.after.clone(),
            dump_logs_on_shutdown: self.dump_logs_on_shutdown,
        }
    }
}

impl<T: Send + 'static> ServiceEntry<T> {
    /// `handler` turns a running container into the value callers look up
    /// through [`Environment::service`]. It runs on every successful start.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ContainerHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DynError>> + Send + 'static,
    {
        Self {
            definition: ServiceDefinition::new(name),
            handler: Arc::new(move |container| handler(container).boxed()),
            before: None,
            after: None,
            dump_logs_on_shutdown: true,
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.definition = self.definition.with_env(key, value);
        self
    }

    #[must_use]
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.definition = self.definition.with_network(network);
        self
    }

    /// Runs once, before the container is first brought up. A failure aborts
    /// the start.
    #[must_use]
    pub fn before<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        self.before = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Runs during every full shutdown, after containers are down.
    #[must_use]
    pub fn after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DynError>> + Send + 'static,
    {
        self.after = Some(Arc::new(move || hook().boxed()));
        self
    }

    #[must_use]
    pub const fn without_shutdown_logs(mut self) -> Self {
        self.dump_logs_on_shutdown = false;
        self
    }
}

impl<T> ServiceEntry<T> {
    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub const fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }
}

struct ShutdownHook {
    service: String,
    container: ContainerHandle,
    dump_logs: bool,
}

impl ShutdownHook {
    async fn run(self) {
        if self.dump_logs {
            self.container.dump_diagnostics().await;
        } else {
            debug!(service = self.service, "shutdown logs suppressed");
        }
    }
}

/// A running set of compose services and the handler outputs built on top
/// of them.
///
/// Lifecycle calls take `&mut self`; one environment is driven by one caller
/// at a time.
pub struct Environment<T> {
    driver: ComposeDriver,
    entries: BTreeMap<String, ServiceEntry<T>>,
    outputs: BTreeMap<String, T>,
    shutdown_hooks: Vec<ShutdownHook>,
    live: bool,
}

impl<T: Send + 'static> Environment<T> {
    /// Bring up `entries` against the local docker daemon.
    pub async fn start(
        config: EnvironmentConfig,
        entries: &[ServiceEntry<T>],
    ) -> Result<Self, ComposeEnvError> {
        let runtime = match DockerRuntime::connect().await {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(error = %err, "docker is not reachable");
                return Err(ComposeEnvError::DockerUnavailable);
            }
        };
        Self::start_with_runtime(config, Arc::new(runtime), entries).await
    }

    /// Run `before` hooks, clean up leftovers, `up` every entry and run the
    /// handlers. Any failure after the hooks triggers a full shutdown.
    pub async fn start_with_runtime(
        config: EnvironmentConfig,
        runtime: Arc<dyn ContainerRuntime>,
        entries: &[ServiceEntry<T>],
    ) -> Result<Self, ComposeEnvError> {
        let mut environment = Self {
            driver: ComposeDriver::new(config, runtime),
            entries: BTreeMap::new(),
            outputs: BTreeMap::new(),
            shutdown_hooks: Vec::new(),
            live: false,
        };

        environment.driver.check_services(&definitions(entries))?;
        run_before_hooks(entries).await?;
        environment.register(entries)?;
        environment.live = true;

        if let Err(err) = environment.bring_up(entries).await {
            if environment.config().no_shutdown() {
                warn!(
                    project = environment.project_name(),
                    "startup failed; shutdown disabled so containers are left running"
                );
            } else {
                environment.shutdown().await;
            }
            return Err(err);
        }

        info!(
            project = environment.project_name(),
            services = ?environment.outputs.keys().collect::<Vec<_>>(),
            "environment ready"
        );
        Ok(environment)
    }

    /// Add `entries` to the environment and bring up only those.
    ///
    /// Entries already known are started again and their handler reruns,
    /// replacing the previous output. `before` hooks run only for entries
    /// seen for the first time.
    pub async fn start_services(
        &mut self,
        entries: &[ServiceEntry<T>],
    ) -> Result<(), ComposeEnvError> {
        if entries.is_empty() {
            return Ok(());
        }

        let definitions = definitions(entries);
        self.driver.check_services(&definitions)?;
        let first_seen: Vec<ServiceEntry<T>> = entries
            .iter()
            .filter(|entry| !self.entries.contains_key(entry.name()))
            .cloned()
            .collect();
        run_before_hooks(&first_seen).await?;
        self.register(entries)?;
        self.live = true;

        for entry in entries {
            self.outputs.remove(entry.name());
        }
        self.driver.start(&definitions).await?;
        self.run_handlers(entries).await
    }

    /// Force-remove the named services.
    ///
    /// Every name is checked first: if any was never registered nothing is
    /// stopped. Stopping a known service that is not running succeeds.
    pub async fn stop_services<I, S>(&mut self, names: I) -> Result<(), ComposeEnvError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(|name| name.as_ref().to_owned())
            .collect();
        let unmanaged: Vec<String> = names
            .iter()
            .filter(|name| !self.entries.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !unmanaged.is_empty() {
            return Err(ComposeEnvError::UnmanagedService { names: unmanaged });
        }

        self.driver.stop(&names).await?;
        for name in &names {
            self.outputs.remove(name);
            self.shutdown_hooks.retain(|hook| hook.service != *name);
        }
        Ok(())
    }

    /// Dump container diagnostics, `down` the whole project, run `after`
    /// hooks and forget every handler output. Failures are logged, never
    /// returned.
    pub async fn shutdown(&mut self) {
        if self.config().no_shutdown() {
            info!(
                project = self.project_name(),
                "shutdown disabled; leaving containers running"
            );
            return;
        }
        if !self.live {
            debug!(project = self.project_name(), "environment already shut down");
            return;
        }

        for hook in mem::take(&mut self.shutdown_hooks) {
            hook.run().await;
        }

        if let Err(err) = self.driver.down().await {
            warn!(project = self.project_name(), error = %err, "compose down failed during shutdown");
        }

        for (service, entry) in &self.entries {
            let Some(after) = &entry.after else {
                continue;
            };
            if let Err(err) = after().await {
                warn!(service, error = %err, "after hook failed");
            }
        }

        self.outputs.clear();
        self.live = false;
        info!(project = self.project_name(), "environment shut down");
    }

    fn register(&mut self, entries: &[ServiceEntry<T>]) -> Result<(), ComposeEnvError> {
        self.driver.add_services(&definitions(entries))?;
        for entry in entries {
            self.entries.insert(entry.name().to_owned(), entry.clone());
        }
        Ok(())
    }

    async fn bring_up(&mut self, entries: &[ServiceEntry<T>]) -> Result<(), ComposeEnvError> {
        if self.config().no_cleanup() {
            debug!(project = self.project_name(), "skipping pre-run cleanup");
        } else if let Err(err) = self.driver.down().await {
            warn!(
                project = self.project_name(),
                error = %err,
                "pre-run cleanup failed; bringing services up anyway"
            );
        }
        self.driver.up().await?;
        self.run_handlers(entries).await
    }

    async fn run_handlers(&mut self, entries: &[ServiceEntry<T>]) -> Result<(), ComposeEnvError> {
        for entry in entries {
            let service = entry.name();
            let container = self.driver.container(service).await?.ok_or_else(|| {
                ComposeEnvError::MissingContainer {
                    service: service.to_owned(),
                }
            })?;

            let output = (entry.handler)(container.clone())
                .await
                .map_err(|source| ComposeEnvError::Handler {
                    service: service.to_owned(),
                    source,
                })?;
            self.outputs.insert(service.to_owned(), output);

            self.shutdown_hooks.retain(|hook| hook.service != service);
            self.shutdown_hooks.push(ShutdownHook {
                service: service.to_owned(),
                container,
                dump_logs: entry.dump_logs_on_shutdown,
            });
            debug!(service, "handler ready");
        }
        Ok(())
    }
}

impl<T> Environment<T> {
    /// Output of the service's most recent handler run.
    pub fn service(&self, name: &str) -> Option<&T> {
        self.outputs.get(name)
    }

    pub const fn services(&self) -> &BTreeMap<String, T> {
        &self.outputs
    }

    /// Fresh lookup of the container currently backing `name`.
    pub async fn container(&self, name: &str) -> Result<Option<ContainerHandle>, ComposeEnvError> {
        self.driver.container(name).await
    }

    /// Every registered service, running or not.
    pub fn managed_services(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn project_name(&self) -> &str {
        self.driver.config().project_name()
    }

    pub const fn config(&self) -> &EnvironmentConfig {
        self.driver.config()
    }

    pub const fn is_shut_down(&self) -> bool {
        !self.live
    }
}

impl<T> Drop for Environment<T> {
    fn drop(&mut self) {
        if !self.live || self.driver.config().no_shutdown() {
            return;
        }
        eprintln!(
            "[compose-env] environment {} dropped without shutdown; running compose down",
            self.project_name()
        );
        self.driver.teardown().run_logged();
    }
}

fn definitions<T>(entries: &[ServiceEntry<T>]) -> Vec<ServiceDefinition> {
    entries
        .iter()
        .map(|entry| entry.definition.clone())
        .collect()
}

async fn run_before_hooks<T>(entries: &[ServiceEntry<T>]) -> Result<(), ComposeEnvError> {
    for entry in entries {
        let Some(before) = &entry.before else {
            continue;
        };
        debug!(service = entry.name(), "running before hook");
        before()
            .await
            .map_err(|source| ComposeEnvError::BeforeHook {
                service: entry.name().to_owned(),
                source,
            })?;
    }
    Ok(())
}
