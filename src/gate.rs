//! Dedup & Flood Gate
//!
//! Admission control for inbound chat events. Rejects everything unless the runtime
//! is ready, counts events in a fixed window, and on overflow throttles all
//! admissions for a cooldown period. Accepted events go straight into the work
//! queue buffer.

use crate::queue::WorkQueue;
use crate::types::{InboundEvent, RuntimeState};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why an inbound event was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DropReason {
    Shutdown,
    Duplicate,
    Throttled,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Shutdown => f.write_str("shutdown"),
            DropReason::Duplicate => f.write_str("duplicate"),
            DropReason::Throttled => f.write_str("throttled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Dropped(DropReason),
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }
}

/// Result of one `admit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub admission: Admission,
    /// This event started a throttling episode; the caller owes one warning.
    pub throttle_started: bool,
}

impl GateDecision {
    fn accepted() -> Self {
        Self {
            admission: Admission::Accepted,
            throttle_started: false,
        }
    }

    fn dropped(reason: DropReason) -> Self {
        Self {
            admission: Admission::Dropped(reason),
            throttle_started: false,
        }
    }
}

/// Fixed-window event counter with cooldown.
#[derive(Debug, Clone)]
pub struct ThrottleWindow {
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub is_throttled: bool,
    pub cooldown_until: Option<Instant>,
}

impl ThrottleWindow {
    fn new(limit: u32, now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            limit,
            is_throttled: false,
            cooldown_until: None,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.window_start = now;
        self.count = 0;
    }
}

/// Gate parameters.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub limit: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_millis(1000),
            cooldown: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug)]
pub struct FloodGate {
    config: GateConfig,
    window: ThrottleWindow,
    closed: bool,
    throttle_episodes: u64,
}

impl FloodGate {
    pub fn new(config: GateConfig, now: Instant) -> Self {
        Self {
            config,
            window: ThrottleWindow::new(config.limit, now),
            closed: false,
            throttle_episodes: 0,
        }
    }

    /// Decide on one inbound event; accepted events are pushed onto `queue`.
    pub fn admit(
        &mut self,
        event: InboundEvent,
        state: RuntimeState,
        queue: &mut WorkQueue,
        now: Instant,
    ) -> GateDecision {
        if self.closed || state != RuntimeState::Ready {
            debug!(message_id = %event.message_id, state = %state, "Dropping event, runtime not ready");
            return GateDecision::dropped(DropReason::Shutdown);
        }

        self.refresh(now);
        if self.window.is_throttled {
            debug!(message_id = %event.message_id, "Dropping event while throttled");
            return GateDecision::dropped(DropReason::Throttled);
        }

        if now.duration_since(self.window.window_start) >= self.config.window {
            self.window.reset(now);
        }
        self.window.count += 1;

        if self.window.count > self.window.limit {
            self.window.is_throttled = true;
            self.window.cooldown_until = Some(now + self.config.cooldown);
            self.throttle_episodes += 1;
            warn!(
                count = self.window.count,
                limit = self.window.limit,
                window_ms = self.config.window.as_millis() as u64,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Flood protection engaged, throttling inbound events"
            );
            return GateDecision {
                admission: Admission::Dropped(DropReason::Throttled),
                throttle_started: true,
            };
        }

        if queue.contains(&event.message_id) {
            debug!(message_id = %event.message_id, "Dropping duplicate event");
            return GateDecision::dropped(DropReason::Duplicate);
        }

        let message_id = event.message_id.clone();
        queue.push(event, now);
        debug!(message_id = %message_id, queue_depth = queue.len(), "Admitted event");
        GateDecision::accepted()
    }

    /// Clear an expired cooldown. Returns true when throttling just ended.
    pub fn refresh(&mut self, now: Instant) -> bool {
        match self.window.cooldown_until {
            Some(until) if self.window.is_throttled && now >= until => {
                self.window.is_throttled = false;
                self.window.cooldown_until = None;
                self.window.reset(now);
                info!("Flood protection cooldown elapsed, accepting events again");
                true
            }
            _ => false,
        }
    }

    /// Reject every further event.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_throttled(&self) -> bool {
        self.window.is_throttled
    }

    pub fn window(&self) -> &ThrottleWindow {
        &self.window
    }

    pub fn throttle_episodes(&self) -> u64 {
        self.throttle_episodes
    }
}
