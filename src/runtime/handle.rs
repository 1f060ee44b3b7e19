//! Caller-facing handle to a running agent runtime.

use crate::error::AgentError;
use crate::gate::{Admission, DropReason};
use crate::runtime::{Command, InitReport, RuntimeStats};
use crate::settings::CandidateSettings;
use crate::types::{InboundEvent, OutboundEvent, RuntimeState};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

/// Cheap, cloneable handle to one runtime instance.
///
/// Every method is safe to call from any task. Once the runtime has shut down,
/// calls fail with [`AgentError::Shutdown`] or report a shutdown drop.
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RuntimeState>,
    events: broadcast::Sender<OutboundEvent>,
    poll_interval: Duration,
}

impl AgentHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<RuntimeState>,
        events: broadcast::Sender<OutboundEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            commands,
            state,
            events,
            poll_interval,
        }
    }

    /// Validate settings and bring the runtime to `Ready`.
    ///
    /// Idempotent: concurrent callers share one validation, and later calls get
    /// the report of the first. `None` uses the configured defaults.
    pub async fn initialize(
        &self,
        candidate: Option<CandidateSettings>,
    ) -> Result<InitReport, AgentError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Initialize { candidate, reply }).await?;
        response.await.map_err(|_| AgentError::Shutdown)?
    }

    /// Offer one inbound event to the flood gate.
    pub async fn submit(&self, event: InboundEvent) -> Admission {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Submit { event, reply }).await.is_err() {
            return Admission::Dropped(DropReason::Shutdown);
        }
        response
            .await
            .unwrap_or(Admission::Dropped(DropReason::Shutdown))
    }

    /// Feed every event from `source` into the runtime until it closes.
    pub async fn subscribe(&self, source: mpsc::Receiver<InboundEvent>) -> Result<(), AgentError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Subscribe { source, reply }).await?;
        response.await.map_err(|_| AgentError::Shutdown)?
    }

    /// Receive outbound agent messages emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<OutboundEvent> {
        self.events.subscribe()
    }

    /// Stop the runtime. Safe to call repeatedly and concurrently.
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = response.await;
        }
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    /// Wait until the runtime reaches `target` or shuts down.
    pub async fn wait_for_state(&self, target: RuntimeState) -> RuntimeState {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|current| *current == target || current.is_terminal())
            .await
            .map(|current| *current);
        // Sender gone: the runtime task has exited, report the last published state.
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    pub async fn stats(&self) -> Result<RuntimeStats, AgentError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        response.await.map_err(|_| AgentError::Shutdown)
    }

    /// Forget the conversation and start a new one.
    pub async fn clear_history(&self) -> Result<(), AgentError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::ClearHistory { reply }).await?;
        response.await.map_err(|_| AgentError::Shutdown)?
    }

    /// Poll until nothing is pending or processing.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> Result<(), AgentError> {
        let start = Instant::now();
        loop {
            let stats = self.stats().await?;
            if stats.queue.pending == 0 && stats.queue.processing == 0 {
                return Ok(());
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return Err(AgentError::Timeout(limit));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AgentError::Shutdown)
    }
}
