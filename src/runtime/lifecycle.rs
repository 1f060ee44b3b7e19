//! Lifecycle state machine: Uninitialized → Initializing → Ready → ShuttingDown → Shutdown.

use crate::error::AgentError;
use crate::runtime::InitReport;
use crate::types::RuntimeState;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

pub(crate) type InitReply = oneshot::Sender<Result<InitReport, AgentError>>;

/// Owns the runtime state and the callers waiting on initialization.
///
/// State is published on a watch channel so handles can read it without a
/// round trip through the runtime loop.
pub struct Lifecycle {
    state: RuntimeState,
    publisher: watch::Sender<RuntimeState>,
    init_waiters: Vec<InitReply>,
    shutdown_started: bool,
}

impl Lifecycle {
    pub fn new() -> (Self, watch::Receiver<RuntimeState>) {
        let (publisher, receiver) = watch::channel(RuntimeState::Uninitialized);
        (
            Self {
                state: RuntimeState::Uninitialized,
                publisher,
                init_waiters: Vec::new(),
                shutdown_started: false,
            },
            receiver,
        )
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Move forward to `next`. Backward or repeated transitions are refused.
    pub fn advance(&mut self, next: RuntimeState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(from = %self.state, to = %next, "Refusing lifecycle transition");
            return false;
        }
        info!(from = %self.state, to = %next, "Runtime state changed");
        self.state = next;
        self.publisher.send_replace(next);
        true
    }

    pub(crate) fn add_init_waiter(&mut self, reply: InitReply) {
        self.init_waiters.push(reply);
    }

    pub fn init_waiters(&self) -> usize {
        self.init_waiters.len()
    }

    /// Hand the same report to every caller waiting on initialization.
    pub fn complete_init(&mut self, report: &InitReport) {
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(Ok(report.clone()));
        }
    }

    /// Fail every pending initialization with `Shutdown`.
    pub fn reject_init(&mut self) {
        for waiter in self.init_waiters.drain(..) {
            let _ = waiter.send(Err(AgentError::Shutdown));
        }
    }

    /// Single-flight guard for teardown. True only for the first caller.
    pub fn begin_shutdown(&mut self) -> bool {
        if self.shutdown_started {
            return false;
        }
        self.shutdown_started = true;
        true
    }

    pub fn shutdown_started(&self) -> bool {
        self.shutdown_started
    }
}
