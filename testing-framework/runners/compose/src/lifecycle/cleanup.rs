use std::{io, thread, time::Duration};

use crate::docker::commands::{ComposeCommandError, ComposeInvocation, run_compose_command};

/// `compose down` that can run from synchronous contexts such as `Drop`.
#[derive(Clone, Debug)]
pub struct BlockingTeardown {
    invocation: ComposeInvocation,
    timeout: Duration,
}

impl BlockingTeardown {
    pub fn new(invocation: ComposeInvocation, timeout: Duration) -> Self {
        debug_assert!(
            !invocation.args().is_empty(),
            "teardown should receive a resolved compose invocation"
        );
        Self {
            invocation,
            timeout,
        }
    }

    /// Runs on a helper thread with its own runtime so it also works while
    /// the caller's runtime is shutting down.
    pub fn run(&self) -> Result<(), ComposeCommandError> {
        let invocation = self.invocation.clone();
        let timeout = self.timeout;
        let command = invocation.description().to_owned();

        let handle = thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|source| ComposeCommandError::Spawn {
                    command: invocation.description().to_owned(),
                    source,
                })?
                .block_on(run_compose_command(&invocation, timeout))
        });

        handle.join().map_err(|_| ComposeCommandError::Spawn {
            command,
            source: io::Error::other("join failure running compose down"),
        })?
    }

    /// Like [`Self::run`], printing instead of returning failures.
    pub fn run_logged(&self) {
        if let Err(err) = self.run() {
            eprintln!("[compose-env] compose down failed: {err}");
        }
    }
}
