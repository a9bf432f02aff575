//! Drain / terminate / continue coordination.
//!
//! Lifecycle triggers arrive as [`LifecycleSignal`] messages on an mpsc
//! queue. Producers (the OS signal listener, the control channel reader)
//! only enqueue; the dispatch loop owns the [`Lifecycle`] state and applies
//! signals between invocations.
//!
//! | Signal    | OS signal | Control kind |
//! |-----------|-----------|--------------|
//! | Drain     | SIGUSR1   | `drain`      |
//! | Terminate | SIGTERM   | `terminate`  |
//! | Continue  | SIGCONT   | `continue`   |

use std::fmt;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Capacity of the signal queue.
pub const SIGNAL_QUEUE_CAPACITY: usize = 32;

/// A lifecycle trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Stop accepting work, keep the connection.
    Drain,
    /// Stop accepting work for good.
    Terminate,
    /// Resume after a drain.
    Continue,
}

/// Externally visible worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Connecting and initializing.
    Starting,
    /// Initialized, `s` line sent.
    Ready,
    /// Dispatching events.
    Serving,
    /// Discarding events until Continue.
    Draining,
    /// Discarding events until the host disconnects.
    Terminating,
    /// Loop finished.
    Shutdown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Serving => "serving",
            WorkerState::Draining => "draining",
            WorkerState::Terminating => "terminating",
            WorkerState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Sending side of the signal queue.
pub type SignalSender = mpsc::Sender<LifecycleSignal>;

/// Receiving side of the signal queue, owned by the dispatch loop.
pub type SignalReceiver = mpsc::Receiver<LifecycleSignal>;

/// Create a signal queue.
pub fn signal_channel() -> (SignalSender, SignalReceiver) {
    mpsc::channel(SIGNAL_QUEUE_CAPACITY)
}

/// Lifecycle state owned by the dispatch loop.
#[derive(Debug)]
pub struct Lifecycle {
    state: WorkerState,
    discard_events: bool,
    drain_pending: bool,
    termination_pending: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Fresh state: starting, accepting events.
    pub fn new() -> Self {
        Self {
            state: WorkerState::Starting,
            discard_events: false,
            drain_pending: false,
            termination_pending: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Whether incoming events are consumed without being handled.
    pub fn discard_events(&self) -> bool {
        self.discard_events
    }

    /// Whether Terminate has been received.
    pub fn is_terminating(&self) -> bool {
        self.state == WorkerState::Terminating
    }

    /// Transition to a new state unless terminating.
    pub fn set_state(&mut self, state: WorkerState) {
        if !self.is_terminating() || state == WorkerState::Shutdown {
            self.state = state;
        }
    }

    /// Apply one signal. Returns `false` if it was ignored.
    pub fn apply(&mut self, signal: LifecycleSignal) -> bool {
        match signal {
            LifecycleSignal::Drain => {
                if self.discard_events {
                    return false;
                }
                self.discard_events = true;
                self.drain_pending = true;
                self.state = WorkerState::Draining;
                true
            }
            LifecycleSignal::Terminate => {
                if self.is_terminating() {
                    return false;
                }
                self.discard_events = true;
                self.termination_pending = true;
                self.state = WorkerState::Terminating;
                true
            }
            LifecycleSignal::Continue => {
                if self.is_terminating() {
                    return false;
                }
                self.discard_events = false;
                self.state = WorkerState::Serving;
                true
            }
        }
    }

    /// Take the pending drain callback flag.
    pub fn take_drain_pending(&mut self) -> bool {
        std::mem::take(&mut self.drain_pending)
    }

    /// Take the pending termination callback flag.
    pub fn take_termination_pending(&mut self) -> bool {
        std::mem::take(&mut self.termination_pending)
    }
}

/// Spawn a task that turns OS signals into queue messages.
///
/// SIGUSR1 → Drain, SIGTERM → Terminate, SIGCONT → Continue. The task ends
/// when the queue's receiver is dropped.
///
/// # Errors
///
/// Returns error if a signal handler cannot be installed.
pub fn spawn_signal_listener(tx: SignalSender) -> Result<JoinHandle<()>> {
    let mut drain = signal(SignalKind::user_defined1())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut resume = signal(SignalKind::from_raw(libc::SIGCONT))?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = drain.recv() => LifecycleSignal::Drain,
                Some(()) = terminate.recv() => LifecycleSignal::Terminate,
                Some(()) = resume.recv() => LifecycleSignal::Continue,
                else => break,
            };

            tracing::debug!(signal = ?received, "Received lifecycle signal");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    }))
}
