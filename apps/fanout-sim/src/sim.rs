use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fanout_core::{ChannelId, ChannelIdError, Delivery, Session, SessionError};
use fanout_log::{InMemoryLog, InMemoryLogConfig};
use fanout_node::{BackboneConfig, Engine, EngineConfig, EngineError, LogBackbone};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SimConfig;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid channel: {0}")]
    Channel(#[from] ChannelIdError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Session that only counts what it is handed.
struct CountingSession {
    id: String,
    received: AtomicUsize,
}

impl Session for CountingSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, delivery: Delivery) -> Result<(), SessionError> {
        let total = self.received.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(session = %self.id, channel = %delivery.packet().channel_id(), total, "delivered");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub node: String,
    pub received: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimReport {
    pub expected_per_node: usize,
    pub nodes: Vec<NodeReport>,
    pub log_records: usize,
}

impl SimReport {
    pub fn is_complete(&self) -> bool {
        self.nodes
            .iter()
            .all(|node| node.received == self.expected_per_node)
    }
}

/// Runs `config.nodes` engines over one in-memory log and publishes
/// `config.messages` messages round-robin across them.
pub fn run(config: &SimConfig, interrupted: &AtomicBool) -> Result<SimReport, SimError> {
    let channel = ChannelId::parse(&config.channel)?;
    let log = InMemoryLog::new(InMemoryLogConfig {
        partitions: config.partitions,
        ..InMemoryLogConfig::default()
    });
    let engine_config = EngineConfig {
        inactive_channel_lifetime: config.inactive_channel_lifetime,
        ..EngineConfig::default()
    };

    let mut nodes = Vec::with_capacity(config.nodes);
    for index in 0..config.nodes {
        let name = format!("node-{index}");
        let backbone = LogBackbone::new(
            log.clone(),
            BackboneConfig {
                concurrency_limit: config.concurrency_limit,
                poll_timeout: config.poll_timeout,
                ..BackboneConfig::new(name.clone(), config.topic.clone())
            },
        );
        let engine = Engine::with_backbone(engine_config.clone(), Arc::new(backbone));
        engine.start_up(config.startup_grace)?;

        let session = Arc::new(CountingSession {
            id: format!("{name}-session"),
            received: AtomicUsize::new(0),
        });
        engine.subscribe(&channel, session.clone());
        nodes.push((name, engine, session));
    }
    info!(nodes = nodes.len(), channel = %channel, "cluster ready");

    for n in 0..config.messages {
        if let Some((name, engine, _)) = nodes.get(n % nodes.len().max(1)) {
            engine.publish(None, &channel, json!({ "seq": n, "from": name }))?;
        }
    }

    let expected = config.messages;
    let deadline = Instant::now() + config.settle_timeout;
    while Instant::now() < deadline && !interrupted.load(Ordering::SeqCst) {
        if nodes
            .iter()
            .all(|(_, _, session)| session.received.load(Ordering::SeqCst) >= expected)
        {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    let report = SimReport {
        expected_per_node: expected,
        nodes: nodes
            .iter()
            .map(|(name, _, session)| NodeReport {
                node: name.clone(),
                received: session.received.load(Ordering::SeqCst),
            })
            .collect(),
        log_records: log.topic_len(&BackboneConfig::new("", config.topic.clone()).log_topic()),
    };

    for (_, engine, _) in &nodes {
        engine.shut_down();
    }
    Ok(report)
}
