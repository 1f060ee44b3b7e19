//! Property-based tests for flood gate admission and history bounds

use nexa_agent::gate::{FloodGate, GateConfig};
use nexa_agent::history::ConversationHistory;
use nexa_agent::queue::WorkQueue;
use nexa_agent::{InboundEvent, RuntimeState};
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

proptest! {
    /// A burst inside one window admits exactly `limit` events and warns once
    #[test]
    fn test_burst_admits_at_most_limit(limit in 1u32..20, burst in 0usize..60) {
        let now = Instant::now();
        let config = GateConfig { limit, ..GateConfig::default() };
        let mut gate = FloodGate::new(config, now);
        let mut queue = WorkQueue::new(Duration::from_millis(100), Duration::from_secs(300));

        let mut accepted = 0usize;
        let mut warnings = 0usize;
        for i in 0..burst {
            let decision = gate.admit(
                InboundEvent::new(format!("m{i}"), "hi"),
                RuntimeState::Ready,
                &mut queue,
                now,
            );
            if decision.admission.is_accepted() {
                accepted += 1;
            }
            if decision.throttle_started {
                warnings += 1;
            }
        }

        prop_assert_eq!(accepted, burst.min(limit as usize));
        prop_assert_eq!(warnings, usize::from(burst > limit as usize));
        prop_assert_eq!(queue.len(), accepted);
    }

    /// Repeated ids are admitted once no matter how often they arrive
    #[test]
    fn test_ids_admitted_once(ids in prop::collection::vec(0u8..5, 1..10)) {
        let now = Instant::now();
        let mut gate = FloodGate::new(GateConfig::default(), now);
        let mut queue = WorkQueue::new(Duration::from_millis(100), Duration::from_secs(300));

        let mut distinct = std::collections::HashSet::new();
        for id in &ids {
            let decision = gate.admit(
                InboundEvent::new(format!("id-{id}"), "hi"),
                RuntimeState::Ready,
                &mut queue,
                now,
            );
            prop_assert_eq!(decision.admission.is_accepted(), distinct.insert(*id));
        }
    }

    /// History never exceeds its cap after trimming
    #[test]
    fn test_history_respects_cap(cap in 1usize..20, exchanges in 0usize..30) {
        let mut history = ConversationHistory::new(cap);
        for i in 0..exchanges {
            history.push_exchange(format!("q{i}"), format!("a{i}"));
            history.trim_to_cap();
            prop_assert!(history.len() <= cap);
        }
        prop_assert!(history.recent(5).len() <= 5);
    }
}
