//! Response Emitter
//!
//! Turns orchestrator results into outbound events. Every emission carries an id;
//! ids emitted recently are suppressed, and ordinary emissions closer together than
//! the minimum spacing are dropped with a warning. Notices (throttle warning,
//! shutdown notice) skip the spacing check and do not move the spacing clock.

use crate::types::{new_message_id, Message, OutboundEvent};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Emitter parameters.
#[derive(Debug, Clone, Copy)]
pub struct EmitterConfig {
    pub min_spacing: Duration,
    pub recent_capacity: usize,
    pub recent_retain: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(100),
            recent_capacity: 100,
            recent_retain: 50,
        }
    }
}

/// Per-emission options.
#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub message_id: Option<String>,
    pub is_error: bool,
    pub is_thinking: bool,
    /// Bypass minimum spacing.
    pub notice: bool,
    pub channel: Option<String>,
    pub mentions: Vec<String>,
}

impl EmitOptions {
    pub fn reply(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..Default::default()
        }
    }

    pub fn error(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            is_error: true,
            ..Default::default()
        }
    }

    pub fn notice() -> Self {
        Self {
            notice: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    Sent(Message),
    /// Id was emitted recently.
    Duplicate(String),
    /// Too close to the previous emission.
    Spaced(String),
}

impl EmitOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, EmitOutcome::Sent(_))
    }
}

/// Bounded insertion-ordered id set.
#[derive(Debug)]
struct RecentIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
    retain: usize,
}

impl RecentIds {
    fn new(capacity: usize, retain: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
            retain: retain.min(capacity),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.members.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            let excess = self.order.len() - self.retain;
            for old in self.order.drain(..excess) {
                self.members.remove(&old);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct ResponseEmitter {
    author: String,
    sender: broadcast::Sender<OutboundEvent>,
    config: EmitterConfig,
    recent: RecentIds,
    last_emit: Option<Instant>,
    emitted: u64,
    dropped: u64,
}

impl ResponseEmitter {
    pub fn new(
        author: impl Into<String>,
        sender: broadcast::Sender<OutboundEvent>,
        config: EmitterConfig,
    ) -> Self {
        Self {
            author: author.into(),
            sender,
            recent: RecentIds::new(config.recent_capacity, config.recent_retain),
            config,
            last_emit: None,
            emitted: 0,
            dropped: 0,
        }
    }

    /// Emit `content` as an agent message.
    pub fn emit(
        &mut self,
        content: impl Into<String>,
        options: EmitOptions,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> EmitOutcome {
        let id = options.message_id.unwrap_or_else(new_message_id);

        if self.recent.contains(&id) {
            self.dropped += 1;
            debug!(message_id = %id, "Suppressing duplicate emission");
            return EmitOutcome::Duplicate(id);
        }

        if !options.notice {
            if let Some(last) = self.last_emit {
                let since = now.duration_since(last);
                if since < self.config.min_spacing {
                    self.dropped += 1;
                    warn!(
                        message_id = %id,
                        since_ms = since.as_millis() as u64,
                        min_spacing_ms = self.config.min_spacing.as_millis() as u64,
                        "Dropping emission inside minimum spacing window"
                    );
                    return EmitOutcome::Spaced(id);
                }
            }
            self.last_emit = Some(now);
        }

        let message = Message {
            id: id.clone(),
            author: self.author.clone(),
            content: content.into(),
            timestamp,
            channel: options.channel,
            mentions: options.mentions,
            is_thinking: options.is_thinking,
            is_error: options.is_error,
        };
        self.recent.insert(id);
        self.emitted += 1;

        // No subscribers is not an error; the message is still considered emitted.
        if self.sender.send(OutboundEvent::from(&message)).is_err() {
            debug!(message_id = %message.id, "No outbound subscribers");
        }
        EmitOutcome::Sent(message)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
