//! Integration tests for admission control: throttling and duplicate suppression

use super::test_utils::{drain_events, next_event, spawn_agent};
use nexa_agent::runtime::THROTTLE_WARNING;
use nexa_agent::{Admission, DropReason, InboundEvent};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_burst_is_throttled_with_single_warning() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    let mut events = harness.handle.events();

    let mut admissions = Vec::new();
    for i in 0..12 {
        let event = InboundEvent::new(format!("burst-{i}"), format!("message {i}"));
        admissions.push(harness.handle.submit(event).await);
    }

    let accepted = admissions.iter().filter(|a| a.is_accepted()).count();
    assert_eq!(accepted, 10);
    assert_eq!(admissions[10], Admission::Dropped(DropReason::Throttled));
    assert_eq!(admissions[11], Admission::Dropped(DropReason::Throttled));

    harness
        .handle
        .wait_for_completion(Some(Duration::from_secs(60)))
        .await
        .unwrap();
    let emitted = drain_events(&mut events, Duration::from_secs(1)).await;

    let warnings = emitted
        .iter()
        .filter(|event| event.content == THROTTLE_WARNING)
        .count();
    assert_eq!(warnings, 1);
    let replies = emitted
        .iter()
        .filter(|event| event.message_id.ends_with("-response"))
        .count();
    assert_eq!(replies, 10);

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.dropped_throttled, 2);
    assert_eq!(stats.throttle_episodes, 1);
    assert_eq!(stats.queue.completed, 10);
}

#[tokio::test(start_paused = true)]
async fn test_admission_resumes_after_cooldown() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();

    for i in 0..11 {
        harness
            .handle
            .submit(InboundEvent::new(format!("flood-{i}"), "spam"))
            .await;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    let during = harness
        .handle
        .submit(InboundEvent::new("during-cooldown", "still there?"))
        .await;
    assert_eq!(during, Admission::Dropped(DropReason::Throttled));

    tokio::time::sleep(Duration::from_secs(4)).await;
    let after = harness
        .handle
        .submit(InboundEvent::new("after-cooldown", "hello again"))
        .await;
    assert_eq!(after, Admission::Accepted);

    let stats = harness.handle.stats().await.unwrap();
    assert!(!stats.throttled);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ids_are_processed_once() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    let mut events = harness.handle.events();

    let first = harness
        .handle
        .submit(InboundEvent::new("dup-1", "what's next?"))
        .await;
    let second = harness
        .handle
        .submit(InboundEvent::new("dup-1", "what's next?"))
        .await;
    assert_eq!(first, Admission::Accepted);
    assert_eq!(second, Admission::Dropped(DropReason::Duplicate));

    let reply = next_event(&mut events).await;
    assert_eq!(reply.message_id, "dup-1-response");

    // Still known after processing finished.
    let replay = harness
        .handle
        .submit(InboundEvent::new("dup-1", "what's next?"))
        .await;
    assert_eq!(replay, Admission::Dropped(DropReason::Duplicate));

    let rest = drain_events(&mut events, Duration::from_secs(1)).await;
    assert!(rest.is_empty());
    assert_eq!(harness.provider.completion_calls().len(), 1);

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.dropped_duplicate, 2);
}

#[tokio::test(start_paused = true)]
async fn test_subscribed_source_feeds_the_gate() {
    let harness = spawn_agent(&["qwen2.5-7b-instruct-1m"]);
    harness.handle.initialize(None).await.unwrap();
    let mut events = harness.handle.events();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    harness.handle.subscribe(rx).await.unwrap();
    tx.send(InboundEvent::new("ui-1", "from the UI")).await.unwrap();
    tx.send(InboundEvent::new("ui-1", "from the UI")).await.unwrap();

    let reply = next_event(&mut events).await;
    assert_eq!(reply.message_id, "ui-1-response");
    assert_eq!(reply.content, "echo: from the UI");

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.subscriptions, 1);
    assert_eq!(stats.dropped_duplicate, 1);

    drop(tx);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.subscriptions, 0);
}
