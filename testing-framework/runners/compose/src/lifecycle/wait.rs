use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};

use compose_env_core::{
    ContainerStatus, RuntimeError, ServiceDefinition, StatusError,
    constants::DEFAULT_POLL_INTERVAL,
};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::container::{ContainerHandle, ContainerLocator};

/// Longest wait ever scheduled; larger budgets mean "until it converges".
const MAX_BUDGET: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Condition a lifecycle call waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Running,
    Stopped,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// Why a single service failed to converge.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("failed to look up container: {0}")]
    Lookup(#[source] RuntimeError),
    #[error(transparent)]
    Status(StatusError),
    #[error("timed out waiting for container to be {target}; last status: {last_status}")]
    TimedOut {
        target: TargetState,
        last_status: String,
    },
}

/// Aggregate outcome of waiting on a set of services.
#[derive(Debug, thiserror::Error)]
pub enum AwaitStateError {
    #[error(
        "error waiting for services to be {target}. errors captured:\n{}",
        render_failures(failures, unresolved)
    )]
    Failed {
        target: TargetState,
        failures: BTreeMap<String, WaitError>,
        unresolved: Vec<String>,
    },
    #[error("timed out waiting for services {services:?} to be {target}")]
    TimedOut {
        target: TargetState,
        services: Vec<String>,
    },
}

impl AwaitStateError {
    /// Services that did not converge, whether they failed or never reported.
    pub fn services(&self) -> Vec<&str> {
        match self {
            Self::Failed {
                failures,
                unresolved,
                ..
            } => failures
                .keys()
                .chain(unresolved)
                .map(String::as_str)
                .collect(),
            Self::TimedOut { services, .. } => services.iter().map(String::as_str).collect(),
        }
    }
}

fn render_failures(failures: &BTreeMap<String, WaitError>, unresolved: &[String]) -> String {
    let mut lines: Vec<String> = failures
        .iter()
        .map(|(service, err)| format!("  {service}: {err}"))
        .collect();
    if !unresolved.is_empty() {
        lines.push(format!("  still waiting on: {unresolved:?}"));
    }
    lines.join("\n")
}

enum Evaluation {
    Converged,
    Pending(String),
    Failed(WaitError),
}

fn evaluate(target: TargetState, status: ContainerStatus) -> Evaluation {
    match (target, status) {
        (TargetState::Running, ContainerStatus::Running) => Evaluation::Converged,
        (TargetState::Stopped, ContainerStatus::Exited) => Evaluation::Converged,
        // A container that died with an exit code is no longer running, which
        // is what a stop waits for.
        (TargetState::Stopped, ContainerStatus::Error(StatusError::ExitCode { .. })) => {
            Evaluation::Converged
        }
        (
            TargetState::Stopped,
            ContainerStatus::Error(StatusError::Inspect {
                source: RuntimeError::NotFound { .. },
                ..
            }),
        ) => Evaluation::Converged,
        (_, ContainerStatus::Error(err)) => Evaluation::Failed(WaitError::Status(err)),
        (_, status) => Evaluation::Pending(status.to_string()),
    }
}

/// Poll every service concurrently until each reaches `target` or `budget`
/// elapses.
///
/// All per-service failures are collected before returning. Tasks still
/// polling when the call returns are cancelled and can no longer report.
/// When waiting for [`TargetState::Stopped`], a container that died with a
/// non-zero exit code counts as stopped rather than failed.
pub async fn await_state(
    locator: &ContainerLocator,
    services: &[ServiceDefinition],
    target: TargetState,
    budget: Duration,
) -> Result<(), AwaitStateError> {
    let interval = DEFAULT_POLL_INTERVAL;
    if services.is_empty() {
        return Ok(());
    }

    let deadline = deadline_after(Instant::now(), budget);
    let token = CancellationToken::new();
    let _cancel_on_return = token.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel(services.len());
    let mut pending: BTreeSet<String> = BTreeSet::new();

    for service in services {
        pending.insert(service.name().to_owned());
        let locator = locator.clone();
        let service = service.clone();
        let token = token.child_token();
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = token.cancelled() => return,
                outcome = poll_service(&locator, &service, target, deadline, interval) => outcome,
            };
            // The receiver is gone once the coordinator has returned.
            let _ = tx.send((service.name().to_owned(), outcome)).await;
        });
    }
    drop(tx);

    let mut failures = BTreeMap::new();
    let grace_deadline = deadline.checked_add(interval).unwrap_or(deadline);
    while !pending.is_empty() {
        match timeout_at(grace_deadline, rx.recv()).await {
            Ok(Some((service, outcome))) => {
                pending.remove(&service);
                if let Err(err) = outcome {
                    failures.insert(service, err);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    let unresolved: Vec<String> = pending.into_iter().collect();
    if !failures.is_empty() {
        return Err(AwaitStateError::Failed {
            target,
            failures,
            unresolved,
        });
    }
    if !unresolved.is_empty() {
        return Err(AwaitStateError::TimedOut {
            target,
            services: unresolved,
        });
    }

    info!(%target, services = services.len(), "services converged");
    Ok(())
}

fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget.min(MAX_BUDGET))
        .unwrap_or(start)
}

async fn poll_service(
    locator: &ContainerLocator,
    service: &ServiceDefinition,
    target: TargetState,
    deadline: Instant,
    interval: Duration,
) -> Result<(), WaitError> {
    loop {
        let container = locator.find(service).await.map_err(WaitError::Lookup)?;

        let last_status = match &container {
            None if target == TargetState::Stopped => return Ok(()),
            None => "no container".to_owned(),
            Some(handle) => match evaluate(target, handle.status().await) {
                Evaluation::Converged => {
                    debug!(service = service.name(), %target, "service converged");
                    return Ok(());
                }
                Evaluation::Failed(err) => return Err(err),
                Evaluation::Pending(status) => status,
            },
        };
        debug!(service = service.name(), %target, status = %last_status, "service not converged yet");

        let now = Instant::now();
        if now >= deadline {
            if target == TargetState::Running {
                dump_on_timeout(container.as_ref()).await;
            }
            return Err(WaitError::TimedOut {
                target,
                last_status,
            });
        }
        sleep(interval.min(deadline - now)).await;
    }
}

async fn dump_on_timeout(container: Option<&ContainerHandle>) {
    if let Some(container) = container {
        container.dump_diagnostics().await;
    }
}
