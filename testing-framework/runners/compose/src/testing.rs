//! Scripted stand-ins for docker and the compose CLI.
//!
//! [`FakeCompose`] is a shell command that appends its arguments to a log
//! file. [`FakeRuntime`] replays that log before every listing, so `up`
//! creates containers, `rm` removes the named ones and `down` removes all.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use compose_env_core::{
    ContainerInspection, ContainerRuntime, ContainerSummary, PublishedPort, RuntimeError,
};
use tempfile::TempDir;

use crate::config::{EnvironmentConfig, EnvironmentConfigBuilder};

pub(crate) const PROJECT: &str = "proj";
pub(crate) const NETWORK: &str = "proj_default";
const GATEWAY: &str = "172.18.0.1";

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, Vec<String>>,
    scripts: HashMap<String, VecDeque<ContainerInspection>>,
    ports: HashMap<String, Vec<PublishedPort>>,
    replayed_lines: usize,
    generation: usize,
    logs_fetched: Vec<String>,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
    compose_log: Option<PathBuf>,
}

impl FakeRuntime {
    pub(crate) fn following(compose: &FakeCompose) -> Self {
        Self {
            state: Mutex::default(),
            compose_log: Some(compose.log.clone()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake runtime state")
    }

    pub(crate) fn insert_container(&self, service: &str, id: &str) {
        self.state()
            .containers
            .entry(service.to_owned())
            .or_default()
            .push(id.to_owned());
    }

    /// Inspections returned in order; the last one repeats.
    pub(crate) fn script(&self, service: &str, inspections: Vec<ContainerInspection>) {
        self.state()
            .scripts
            .insert(service.to_owned(), inspections.into());
    }

    pub(crate) fn set_ports(&self, service: &str, ports: Vec<PublishedPort>) {
        self.state().ports.insert(service.to_owned(), ports);
    }

    pub(crate) fn container_ids(&self, service: &str) -> Vec<String> {
        self.replay();
        self.state()
            .containers
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn running_services(&self) -> Vec<String> {
        self.replay();
        self.state()
            .containers
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(service, _)| service.clone())
            .collect()
    }

    /// Container ids whose logs were requested, in order.
    pub(crate) fn logs_fetched(&self) -> Vec<String> {
        self.state().logs_fetched.clone()
    }

    fn replay(&self) {
        let Some(log) = &self.compose_log else {
            return;
        };
        let contents = fs::read_to_string(log).unwrap_or_default();
        let mut state = self.state();
        let lines: Vec<&str> = contents.lines().skip(state.replayed_lines).collect();
        state.replayed_lines += lines.len();

        for line in lines {
            let args: Vec<&str> = line.split_whitespace().collect();
            let Some(project_at) = args.iter().position(|arg| *arg == "-p") else {
                continue;
            };
            let Some((verb, rest)) = args[project_at + 2..].split_first() else {
                continue;
            };
            let names = rest.iter().filter(|arg| !arg.starts_with('-'));
            match *verb {
                "up" => {
                    for name in names {
                        state.generation += 1;
                        let id = format!("{name}-{}", state.generation);
                        let ids = state.containers.entry((*name).to_owned()).or_default();
                        if ids.is_empty() {
                            ids.push(id);
                        }
                    }
                }
                "rm" => {
                    for name in names {
                        state.containers.remove(*name);
                    }
                }
                "down" => state.containers.clear(),
                _ => {}
            }
        }
    }

    fn service_of(&self, id: &str) -> Result<String, RuntimeError> {
        self.replay();
        self.state()
            .containers
            .iter()
            .find(|(_, ids)| ids.iter().any(|candidate| candidate == id))
            .map(|(service, _)| service.clone())
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_owned() })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(
        &self,
        _label: &str,
        name: &str,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        self.replay();
        let state = self.state();
        let ports = &state.ports;
        let summaries = state
            .containers
            .iter()
            .filter(|(service, _)| service.contains(name))
            .flat_map(move |(service, ids)| {
                ids.iter().map(move |id| ContainerSummary {
                    id: id.clone(),
                    names: vec![format!("/{PROJECT}-{service}-1")],
                    ports: ports.get(service).cloned().unwrap_or_default(),
                    networks: BTreeMap::from([(NETWORK.to_owned(), Some(GATEWAY.to_owned()))]),
                })
            })
            .collect();
        Ok(summaries)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspection, RuntimeError> {
        let service = self.service_of(id)?;
        let mut state = self.state();
        let Some(script) = state.scripts.get_mut(&service) else {
            return Ok(ContainerInspection::running());
        };
        let inspection = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(inspection.unwrap_or_else(ContainerInspection::running))
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        self.service_of(id)?;
        self.state().logs_fetched.push(id.to_owned());
        Ok(format!("log output of {id}\n"))
    }

    async fn exec(&self, id: &str, command: &str) -> Result<Vec<String>, RuntimeError> {
        self.service_of(id)?;
        Ok(vec![command.to_owned()])
    }
}

/// Compose command that records every invocation instead of running docker.
pub(crate) struct FakeCompose {
    dir: TempDir,
    log: PathBuf,
}

impl FakeCompose {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("fake compose dir");
        let log = dir.path().join("compose.log");
        fs::write(dir.path().join("docker-compose.yml"), "services: {}\n")
            .expect("fake compose file");
        Self { dir, log }
    }

    pub(crate) fn runtime(&self) -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime::following(self))
    }

    pub(crate) fn command(&self) -> Vec<String> {
        vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!("echo \"$@\" >> '{}'", self.log.display()),
            "fake-compose".to_owned(),
        ]
    }

    /// Like [`Self::command`], but `verb` fails without being recorded.
    pub(crate) fn command_failing(&self, verb: &str) -> Vec<String> {
        let mut command = self.command();
        command[2] = format!(
            "case \" $* \" in *\" -p {PROJECT} {verb} \"*) echo \"{verb} refused\" >&2; exit 1;; esac; {}",
            command[2]
        );
        command
    }

    /// Recorded invocations, one per line, as `<verb> <args...>`.
    pub(crate) fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| {
                let (_, after_project) = line.split_once(&format!("-p {PROJECT} "))?;
                Some(after_project.to_owned())
            })
            .collect()
    }

    pub(crate) fn config(&self) -> EnvironmentConfig {
        self.config_with(|builder| builder)
    }

    pub(crate) fn config_with(
        &self,
        customize: impl FnOnce(EnvironmentConfigBuilder) -> EnvironmentConfigBuilder,
    ) -> EnvironmentConfig {
        let builder = EnvironmentConfig::builder([self.dir.path().join("docker-compose.yml")])
            .with_project_name(PROJECT)
            .with_compose_command(self.command())
            .with_up_timeout(Duration::from_secs(5))
            .with_down_timeout(Duration::from_secs(5));
        customize(builder).build().expect("fake compose config")
    }
}
