//! Event Queue Integration Tests
//!
//! Tests for priority ordering, durability across reopen, recovery of
//! damaged logs, and dead-lettering.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docflow::core::{EventHandler, EventQueue, EventQueueConfig, QueueError};
use docflow::domain::Event;
use serde_json::json;
use tempfile::TempDir;

fn log_in(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("state").join("events.jsonl")
}

#[tokio::test]
async fn test_replay_respects_priority() {
    let dir = TempDir::new().unwrap();
    let mut queue = EventQueue::open(EventQueueConfig::new(log_in(&dir))).await.unwrap();

    for (id, priority) in [("five", 5), ("one", 1), ("three", 3)] {
        queue
            .publish(Event::new(id, json!({"id": id})).with_priority(priority))
            .await
            .unwrap();
    }

    let consumed = queue.replay_events().await;
    let priorities: Vec<i64> = consumed.iter().map(|e| e.priority).collect();
    assert_eq!(priorities, vec![1, 3, 5]);

    let metrics = queue.get_metrics();
    assert_eq!(metrics.processed, 3);
    assert_eq!(metrics.failed, 0);
    assert_eq!(metrics.current_queue_length, 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_durability_round_trip() {
    for n in [0usize, 5] {
        let dir = TempDir::new().unwrap();
        let path = log_in(&dir);

        let mut published = Vec::new();
        {
            let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
            for i in 0..n {
                let event = Event::new(format!("evt-{}", i), json!({"n": i}))
                    .with_priority((i % 3) as i64)
                    .with_timestamp(1_700_000_000.0 + i as f64);
                queue.publish(event.clone()).await.unwrap();
                published.push(event);
            }
        }

        // Reopen as if after a restart
        let mut reopened = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
        assert_eq!(reopened.len(), n);

        let replayed = reopened.replay_events().await;
        published.sort_by(|a, b| a.order_key_cmp(b));
        assert_eq!(replayed, published);
    }
}

#[tokio::test]
async fn test_log_is_not_rewritten_by_consumption() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);

    {
        let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
        queue.publish(Event::new("a", json!(1))).await.unwrap();
        queue.replay_events().await;
    }

    let reopened = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
    assert_eq!(reopened.len(), 1);
}

#[tokio::test]
async fn test_corrupt_line_is_skipped() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, r#"{{"event_id": "good-1", "data": {{"k": 1}}, "priority": 2, "timestamp": 1.0}}"#).unwrap();
    writeln!(file, r#"{{"event_id": "torn", "data": "#).unwrap();
    writeln!(file, "not json at all").unwrap();
    writeln!(file, r#"{{"event_id": "", "data": {{}}, "priority": 1, "timestamp": 1.0}}"#).unwrap();
    writeln!(file, r#"{{"event_id": "good-2", "data": [1, 2], "priority": 1, "timestamp": 2.0}}"#).unwrap();
    drop(file);

    let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
    assert_eq!(queue.len(), 2);

    let ids: Vec<String> = queue.replay_events().await.into_iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec!["good-2", "good-1"]);
}

#[tokio::test]
async fn test_dedup_on_recovery_is_opt_in() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);

    {
        let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
        queue.publish(Event::new("same", json!("first")).with_priority(4)).await.unwrap();
        queue.publish(Event::new("same", json!("second")).with_priority(1)).await.unwrap();
        queue.publish(Event::new("other", json!("x"))).await.unwrap();
    }

    let plain = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
    assert_eq!(plain.len(), 3);

    let mut deduped = EventQueue::open(EventQueueConfig::new(&path).with_dedup_on_recovery(true))
        .await
        .unwrap();
    assert_eq!(deduped.len(), 2);

    let kept = deduped.replay_events().await;
    let same = kept.iter().find(|e| e.event_id == "same").unwrap();
    assert_eq!(same.data, json!("first"));
}

#[tokio::test]
async fn test_invalid_event_rejected_on_publish() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);
    let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();

    let result = queue.publish(Event::new("", json!({"k": 1}))).await;
    assert!(matches!(result, Err(QueueError::Validation(_))));

    let result = queue.publish(Event::new("null-data", serde_json::Value::Null)).await;
    assert!(matches!(result, Err(QueueError::Validation(_))));

    assert!(queue.is_empty());
    assert!(!path.exists() || std::fs::read_to_string(&path).unwrap().is_empty());
}

#[tokio::test]
async fn test_non_finite_timestamp_rejected_on_publish() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);

    {
        let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
        for timestamp in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = queue
                .publish(Event::new("bad-clock", json!({"k": 1})).with_timestamp(timestamp))
                .await;
            assert!(matches!(result, Err(QueueError::Validation(_))));
        }
        queue.publish(Event::new("good", json!({"k": 1}))).await.unwrap();
    }

    // Every acknowledged publish survives a cold start
    let reopened = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.peek().unwrap().event_id, "good");
}

#[tokio::test]
async fn test_recovery_accepts_numeric_id_and_null_timestamp() {
    let dir = TempDir::new().unwrap();
    let path = log_in(&dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, r#"{{"event_id": 7, "data": {{"k": 1}}, "priority": 1, "timestamp": null}}"#).unwrap();
    writeln!(file, r#"{{"event_id": "named", "data": "x", "priority": 2, "timestamp": 1.0}}"#).unwrap();
    drop(file);

    let mut queue = EventQueue::open(EventQueueConfig::new(&path)).await.unwrap();
    assert_eq!(queue.len(), 2);

    let replayed = queue.replay_events().await;
    assert_eq!(replayed[0].event_id, "7");
    assert!(replayed[0].timestamp.is_finite());
    assert_eq!(replayed[1].event_id, "named");
}

/// Fails every event whose data contains `"fail": true`
struct PickyHandler {
    seen: AtomicUsize,
}

#[async_trait]
impl EventHandler for PickyHandler {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if event.data.get("fail") == Some(&json!(true)) {
            anyhow::bail!("handler rejected {}", event.event_id);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_failing_handler_dead_letters_then_requeue() {
    let dir = TempDir::new().unwrap();
    let handler = Arc::new(PickyHandler {
        seen: AtomicUsize::new(0),
    });
    let mut queue = EventQueue::open(EventQueueConfig::new(log_in(&dir)))
        .await
        .unwrap()
        .with_handler(handler.clone());

    queue.publish(Event::new("ok", json!({"fail": false}))).await.unwrap();
    queue.publish(Event::new("bad", json!({"fail": true})).with_priority(1)).await.unwrap();

    let consumed = queue.replay_events().await;
    assert_eq!(consumed.len(), 2);
    assert_eq!(handler.seen.load(Ordering::SeqCst), 2);

    let metrics = queue.get_metrics();
    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.failed, 1);
    assert_eq!(queue.dead_letters().len(), 1);
    assert_eq!(queue.dead_letters()[0].event_id, "bad");

    // Manual replay only
    assert!(queue.is_empty());
    assert_eq!(queue.requeue_dead_letters(), 1);
    assert_eq!(queue.len(), 1);
    assert!(queue.dead_letters().is_empty());

    let event = queue.pop().unwrap();
    let err = queue.process_event(&event).await.unwrap_err();
    assert!(matches!(err, QueueError::Handler { .. }));
    assert_eq!(queue.dead_letters().len(), 1);
}

#[tokio::test]
async fn test_malformed_event_is_dead_lettered() {
    let dir = TempDir::new().unwrap();
    let mut queue = EventQueue::open(EventQueueConfig::new(log_in(&dir))).await.unwrap();

    let malformed = Event::new("   ", json!({}));
    let result = queue.process_event(&malformed).await;

    assert!(matches!(result, Err(QueueError::Validation(_))));
    assert_eq!(queue.dead_letters().len(), 1);
    assert_eq!(queue.get_metrics().failed, 1);
}
