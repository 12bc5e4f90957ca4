use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fanout_core::{ChannelId, RecordingSession};
use fanout_log::InMemoryLog;
use fanout_node::{BackboneConfig, ComponentStatus, Engine, EngineConfig, LogBackbone};
use serde_json::json;

const TOPIC: &str = "fanout-chat";

fn node(log: &InMemoryLog, name: &str) -> Engine {
    let config = BackboneConfig {
        poll_timeout: Duration::from_millis(50),
        readiness_retry_interval: Duration::from_millis(10),
        status_poll_interval: Duration::from_millis(5),
        concurrency_limit: 2,
        ..BackboneConfig::new(name, "chat")
    };
    let engine = Engine::with_backbone(
        EngineConfig::default(),
        Arc::new(LogBackbone::new(log.clone(), config)),
    );
    engine.start_up(Duration::from_secs(2)).expect("node starts");
    engine
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn remote_subscriber_receives_exactly_once_without_echo() {
    let log = InMemoryLog::default();
    let a = node(&log, "node-a");
    let b = node(&log, "node-b");
    let room = ChannelId::parse("/chat/room1").expect("valid");
    let session = Arc::new(RecordingSession::new("S"));
    assert!(b.subscribe(&room, session.clone()));

    let local = a.publish(None, &room, json!({"text": "hi"})).expect("publish");
    assert_eq!(local, 0);

    wait_until(|| session.received_count() >= 1);
    // Give any echo or duplicate time to show up.
    thread::sleep(Duration::from_millis(300));

    let received = session.take_received();
    assert_eq!(received.len(), 1);
    let messages = received[0].packet().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, json!({"text": "hi"}));
    assert_eq!(log.topic_len(TOPIC), 1);

    a.shut_down();
    b.shut_down();
    assert_eq!(a.backbone_status(), Some(ComponentStatus::Stopped));
}

#[test]
fn publisher_node_delivers_locally_once() {
    let log = InMemoryLog::default();
    let a = node(&log, "node-a");
    let _b = node(&log, "node-b");
    let room = ChannelId::parse("/chat/room1").expect("valid");
    let session = Arc::new(RecordingSession::new("local"));
    a.subscribe(&room, session.clone());

    assert_eq!(a.publish(Some("other"), &room, json!(1)).expect("publish"), 1);
    wait_until(|| log.topic_len(TOPIC) == 1);
    thread::sleep(Duration::from_millis(300));

    assert_eq!(session.received_count(), 1);
    assert_eq!(log.topic_len(TOPIC), 1);
}

#[test]
fn every_node_sees_every_publication() {
    let log = InMemoryLog::default();
    let nodes: Vec<Engine> = ["n0", "n1", "n2"].iter().map(|name| node(&log, name)).collect();
    let room = ChannelId::parse("/chat/room1").expect("valid");
    let sessions: Vec<Arc<RecordingSession>> = (0..nodes.len())
        .map(|i| Arc::new(RecordingSession::new(format!("s{i}"))))
        .collect();
    for (engine, session) in nodes.iter().zip(&sessions) {
        engine.subscribe(&room, session.clone());
    }

    for (i, engine) in nodes.iter().enumerate() {
        engine.publish(None, &room, json!({ "from": i })).expect("publish");
    }

    wait_until(|| sessions.iter().all(|s| s.received_count() >= nodes.len()));
    thread::sleep(Duration::from_millis(200));
    for session in &sessions {
        assert_eq!(session.received_count(), nodes.len());
    }
    assert_eq!(log.topic_len(TOPIC), nodes.len());

    for engine in &nodes {
        engine.shut_down();
    }
}
