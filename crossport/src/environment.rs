//! Environments: the isolated event loops that own ports.
//!
//! An [`Environment`] models one independent execution context: a dedicated
//! OS thread running a tokio current-thread runtime inside a `LocalSet`.
//! Every port is bound to exactly one environment, and all of a port's
//! message deliveries happen on that environment's loop thread.
//!
//! The loop is fed closures over an unbounded channel; a port's receive task
//! is spawned onto it with `spawn_local` and parked on a [`PortWake`] — a
//! coalescing, cross-thread wake-up built on [`tokio::sync::Notify`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tokio::sync::{Notify, mpsc};

use crossport_core::PortError;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum LoopCommand {
    Run(Job),
    Shutdown,
}

/// An isolated execution context with its own event loop.
///
/// Dropping the environment (or calling [`Environment::shutdown`]) begins
/// teardown, stops the loop and joins its thread. Ports bound to the
/// environment stop delivering messages at that point.
pub struct Environment {
    handle: EnvHandle,
    thread: Option<thread::JoinHandle<()>>,
}

/// Cloneable handle onto an environment's loop.
#[derive(Clone)]
pub struct EnvHandle {
    shared: Arc<EnvShared>,
    commands: mpsc::UnboundedSender<LoopCommand>,
}

struct EnvShared {
    name: String,
    calls_allowed: AtomicBool,
}

impl Environment {
    /// Spawn a new environment whose loop thread carries `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::EnvironmentSpawn`] if the OS refuses the thread.
    pub fn new(name: impl Into<String>) -> Result<Self, PortError> {
        let shared = Arc::new(EnvShared {
            name: name.into(),
            calls_allowed: AtomicBool::new(true),
        });
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(shared.name.clone())
            .spawn(move || run_event_loop(loop_shared, commands_rx))
            .map_err(|e| PortError::EnvironmentSpawn {
                message: e.to_string(),
            })?;

        Ok(Self {
            handle: EnvHandle { shared, commands },
            thread: Some(thread),
        })
    }

    /// Handle for binding ports to this environment.
    pub fn handle(&self) -> &EnvHandle {
        &self.handle
    }

    /// Tear the environment down: no further user-code callbacks run, the
    /// loop stops and the thread is joined.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.begin_teardown();
        let _ = self.handle.commands.send(LoopCommand::Shutdown);
        if thread.join().is_err() {
            tracing::error!(env = %self.handle.name(), "event loop thread panicked");
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl EnvHandle {
    /// Name of the environment, as used in logs and the thread name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether user-code callbacks may still run on this environment.
    ///
    /// Receive loops consult this before every delivery; once it is false,
    /// queued messages are drained silently.
    pub fn can_call_user_code(&self) -> bool {
        self.shared.calls_allowed.load(Ordering::Acquire)
    }

    /// Begin environment teardown: message handlers stop being invoked.
    ///
    /// The loop keeps running until [`Environment::shutdown`] completes, so
    /// receive tasks can still drain (and discard) their queues.
    pub fn begin_teardown(&self) {
        self.shared.calls_allowed.store(false, Ordering::Release);
    }

    /// Run a closure on the loop thread.
    pub(crate) fn schedule(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), PortError> {
        self.commands
            .send(LoopCommand::Run(Box::new(job)))
            .map_err(|_| PortError::EnvironmentGone {
                name: self.shared.name.clone(),
            })
    }
}

fn run_event_loop(shared: Arc<EnvShared>, mut commands: mpsc::UnboundedReceiver<LoopCommand>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(env = %shared.name, error = %err, "failed to build event loop runtime");
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    tracing::debug!(env = %shared.name, "event loop started");
    local.block_on(&runtime, async {
        while let Some(command) = commands.recv().await {
            match command {
                LoopCommand::Run(job) => job(),
                LoopCommand::Shutdown => break,
            }
        }
    });
    // Dropping the LocalSet cancels any receive tasks still parked on it.
    tracing::debug!(env = %shared.name, "event loop stopped");
}

/// Cross-thread wake-up for a port's receive task.
///
/// `signal` may be called from any thread; repeated signals coalesce into a
/// single drain because the underlying [`Notify`] stores at most one permit.
#[derive(Clone)]
pub(crate) struct PortWake {
    notify: Arc<Notify>,
}

impl PortWake {
    pub(crate) fn new(notify: Arc<Notify>) -> Self {
        Self { notify }
    }

    /// Schedule one drain on the owning loop. Idempotent.
    pub(crate) fn signal(&self) {
        self.notify.notify_one();
    }
}
