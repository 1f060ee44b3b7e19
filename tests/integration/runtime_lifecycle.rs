//! Integration tests for runtime initialization and shutdown

use super::test_utils::{drain_events, next_event, spawn_agent, spawn_agent_with};
use nexa_agent::provider::MockProviderClient;
use nexa_agent::runtime::SHUTDOWN_NOTICE;
use nexa_agent::store::ConversationStore;
use nexa_agent::{Admission, AgentError, DropReason, InboundEvent, NexaConfig, RuntimeState};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_initialize_is_idempotent() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m", "llama3"]);

    let first = harness.handle.initialize(None).await.unwrap();
    let second = harness.handle.initialize(None).await.unwrap();

    assert!(first.verified);
    assert!(!first.fallback_used);
    assert_eq!(first.settings, second.settings);
    assert_eq!(first.settings.model(), "qwen2.5-7b-instruct-1m");
    assert_eq!(harness.provider.list_calls().len(), 1);
    assert_eq!(harness.handle.state(), RuntimeState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_initialize_shares_one_validation() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.provider.set_list_delay(Duration::from_millis(500));

    let other = harness.handle.clone();
    let (a, b) = tokio::join!(harness.handle.initialize(None), other.initialize(None));

    assert_eq!(a.unwrap().settings, b.unwrap().settings);
    assert_eq!(harness.provider.list_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_before_ready_are_dropped() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);

    let admission = harness.handle.submit(InboundEvent::new("early", "hello")).await;
    assert_eq!(admission, Admission::Dropped(DropReason::Shutdown));

    harness.handle.initialize(None).await.unwrap();
    let admission = harness.handle.submit(InboundEvent::new("early", "hello")).await;
    assert_eq!(admission, Admission::Accepted);
}

#[tokio::test(start_paused = true)]
async fn test_best_effort_mode_when_no_provider_answers() {
    // No model lists configured: every validation attempt fails.
    let harness = spawn_agent_with(NexaConfig::default(), MockProviderClient::new());
    let mut events = harness.handle.events();

    let report = harness.handle.initialize(None).await.unwrap();
    assert!(!report.verified);
    assert!(report.fallback_used);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(harness.handle.state(), RuntimeState::Ready);

    let admission = harness
        .handle
        .submit(InboundEvent::new("m1", "status?"))
        .await;
    assert!(admission.is_accepted());

    let event = next_event(&mut events).await;
    assert_eq!(event.message_id, "m1-response");
    assert_eq!(event.content, "echo: status?");
    assert!(!event.is_error);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_shutdown_emits_one_notice() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    let mut events = harness.handle.events();

    let other = harness.handle.clone();
    tokio::join!(harness.handle.shutdown(), other.shutdown());
    harness.handle.shutdown().await;

    assert_eq!(harness.handle.state(), RuntimeState::Shutdown);
    let emitted = drain_events(&mut events, Duration::from_secs(1)).await;
    let notices = emitted
        .iter()
        .filter(|event| event.content == SHUTDOWN_NOTICE)
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_shutdown_fail_cleanly() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    harness.handle.shutdown().await;

    let admission = harness.handle.submit(InboundEvent::new("late", "hi")).await;
    assert_eq!(admission, Admission::Dropped(DropReason::Shutdown));
    assert!(matches!(
        harness.handle.initialize(None).await,
        Err(AgentError::Shutdown)
    ));
    assert!(harness.handle.clear_history().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_pending_initialization() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.provider.set_list_delay(Duration::from_secs(30));

    let handle = harness.handle.clone();
    let init = tokio::spawn(async move { handle.initialize(None).await });
    assert_eq!(
        harness.handle.wait_for_state(RuntimeState::Initializing).await,
        RuntimeState::Initializing
    );

    harness.handle.shutdown().await;
    assert!(matches!(init.await.unwrap(), Err(AgentError::Shutdown)));
    assert_eq!(harness.handle.state(), RuntimeState::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_queued_messages() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    harness.provider.push_reply(nexa_agent::provider::MockReply::Delayed(
        Duration::from_secs(30),
        "slow".to_string(),
    ));
    let mut events = harness.handle.events();

    for id in ["q1", "q2", "q3"] {
        assert!(harness
            .handle
            .submit(InboundEvent::new(id, "work"))
            .await
            .is_accepted());
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.handle.shutdown().await;

    let emitted = drain_events(&mut events, Duration::from_secs(1)).await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].content, SHUTDOWN_NOTICE);
    assert_eq!(harness.provider.completion_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_history_starts_new_conversation() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    let before = harness.store.conversation_id().unwrap();
    assert!(before.is_some());

    harness
        .handle
        .submit(InboundEvent::new("m1", "remember this"))
        .await;
    harness
        .handle
        .wait_for_completion(Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(harness.store.load_history().unwrap().len(), 2);

    harness.handle.clear_history().await.unwrap();
    assert!(harness.store.load_history().unwrap().is_empty());
    assert_ne!(harness.store.conversation_id().unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_stats_report_state_and_model() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.state, RuntimeState::Uninitialized);
    assert_eq!(stats.model, None);

    harness.handle.initialize(None).await.unwrap();
    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.state, RuntimeState::Ready);
    assert_eq!(stats.model.as_deref(), Some("qwen2.5-7b-instruct-1m"));
    assert_eq!(stats.settings_verified, Some(true));
}
