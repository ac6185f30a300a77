use std::{
    collections::VecDeque,
    ffi::OsString,
    io,
    path::Path,
    process::{self, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt as _, AsyncRead, BufReader},
    process::Command,
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, warn};

const STDERR_TAIL_LINES: usize = 20;
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Errors running compose commands.
#[derive(Debug, thiserror::Error)]
pub enum ComposeCommandError {
    #[error("{command} exited with status {status}{tail}", tail = format_tail(stderr))]
    Failed {
        command: String,
        status: process::ExitStatus,
        stderr: Vec<String>,
    },
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(": {}", lines.join(" | "))
    }
}

/// A fully resolved compose call that can be replayed on any runtime.
#[derive(Clone, Debug)]
pub struct ComposeInvocation {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    description: String,
}

impl ComposeInvocation {
    /// `command` is the compose front-end (`["docker", "compose"]`); the
    /// first element is the program.
    pub fn new(command: &[String], files: &[impl AsRef<Path>], project: &str) -> Self {
        let (program, leading) = command
            .split_first()
            .map_or((String::new(), &[][..]), |(program, rest)| {
                (program.clone(), rest)
            });

        let mut args: Vec<OsString> = leading.iter().map(OsString::from).collect();
        for file in files {
            args.push("-f".into());
            args.push(file.as_ref().as_os_str().to_owned());
        }
        args.push("-p".into());
        args.push(project.into());

        Self {
            description: command.join(" "),
            program,
            args,
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn subcommand<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|arg| arg.as_ref().to_owned()).collect();
        if let Some(verb) = args.first() {
            self.description = format!("{} {verb}", self.description);
        }
        self.args.extend(args.into_iter().map(OsString::from));
        self
    }

    #[must_use]
    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.envs
            .extend(vars.into_iter().map(|(key, value)| (key.clone(), value.clone())));
        self
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Human readable label such as `docker compose up`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Inherits the current process environment plus the declared service
    /// variables.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Run a compose invocation to completion, streaming its output into the log
/// and killing it once `timeout_duration` elapses.
pub async fn run_compose_command(
    invocation: &ComposeInvocation,
    timeout_duration: Duration,
) -> Result<(), ComposeCommandError> {
    let description = invocation.description();
    let mut child = invocation
        .to_command()
        .spawn()
        .map_err(|source| ComposeCommandError::Spawn {
            command: description.to_owned(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .map(|pipe| spawn_drain(pipe, description, OutputStream::Stdout));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| spawn_drain(pipe, description, OutputStream::Stderr));

    let status = match timeout(timeout_duration, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(source)) => {
            return Err(ComposeCommandError::Spawn {
                command: description.to_owned(),
                source,
            });
        }
        Err(_) => {
            if let Err(err) = child.kill().await {
                warn!(command = description, error = %err, "failed to kill timed out compose process");
            }
            return Err(ComposeCommandError::Timeout {
                command: description.to_owned(),
                timeout: timeout_duration,
            });
        }
    };

    let _ = collect_drain(stdout).await;
    let stderr_tail = collect_drain(stderr).await;

    if status.success() {
        Ok(())
    } else {
        Err(ComposeCommandError::Failed {
            command: description.to_owned(),
            status,
            stderr: stderr_tail,
        })
    }
}

fn spawn_drain<R>(pipe: R, description: &str, stream: OutputStream) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let command = description.to_owned();
    tokio::spawn(async move { drain_lines(pipe, &command, stream).await })
}

async fn drain_lines<R>(pipe: R, command: &str, stream: OutputStream) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(target: "compose_env::process", command, stream = stream.label(), "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(err) => {
                warn!(command, stream = stream.label(), error = %err, "failed reading compose output");
                break;
            }
        }
    }

    tail.into()
}

async fn collect_drain(task: Option<JoinHandle<Vec<String>>>) -> Vec<String> {
    let Some(task) = task else {
        return Vec::new();
    };
    // A grandchild holding the pipe open must not stall the caller.
    match timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(Ok(lines)) => lines,
        _ => Vec::new(),
    }
}
