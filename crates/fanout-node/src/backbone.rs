//! Cross-node replication over a shared partitioned log.
//!
//! A [`LogBackbone`] owns one producer pool and `concurrency_limit` consumer
//! workers. Every backbone joins the log with its own random consumer group,
//! so each node reads every record; envelopes stamped with the local node
//! name are discarded on the way back in.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use fanout_codec::{CborPacketCodec, PacketCodec};
use fanout_core::Packet;
use fanout_log::{LogConnector, LogError};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::BackboneConfig;
use crate::consumer::{ConsumerWorker, WorkerContext};
use crate::producer::BackboneProducer;

/// Receiver for packets that arrived from other nodes.
pub trait PacketSink: Send + Sync {
    /// Delivers to local subscribers only; never re-published.
    fn deliver_local(&self, packet: Packet);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComponentStatus {
    Stopped = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
}

impl ComponentStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BackboneError {
    #[error("log cluster not reachable within {0:?}")]
    ClusterUnavailable(Duration),
    #[error("backbone is {0}")]
    NotStarted(ComponentStatus),
    #[error("log client error: {0}")]
    Log(#[from] LogError),
    #[error("failed to spawn backbone thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Replication seam used by the engine.
pub trait ServerBackbone: Send + Sync {
    /// Idempotent; concurrent callers wait for the winner.
    fn start_up(&self, sink: Arc<dyn PacketSink>, grace: Duration) -> Result<(), BackboneError>;
    /// Idempotent; stops every worker before reporting stopped.
    fn shut_down(&self);
    fn status(&self) -> ComponentStatus;
    /// Queues `packet` for replication. Transmission failures are only logged.
    fn publish(&self, packet: &Packet) -> Result<(), BackboneError>;
}

pub struct LogBackbone<C: LogConnector> {
    connector: C,
    config: BackboneConfig,
    codec: Arc<dyn PacketCodec>,
    group_id: String,
    status: AtomicU8,
    producer: ArcSwapOption<BackboneProducer<C::Producer>>,
    workers: Mutex<Vec<ConsumerWorker>>,
}

impl<C: LogConnector> LogBackbone<C> {
    pub fn new(connector: C, config: BackboneConfig) -> Self {
        Self::with_codec(connector, config, Arc::new(CborPacketCodec))
    }

    pub fn with_codec(connector: C, config: BackboneConfig, codec: Arc<dyn PacketCodec>) -> Self {
        Self {
            connector,
            config,
            codec,
            group_id: hex::encode(rand::random::<[u8; 16]>()),
            status: AtomicU8::new(ComponentStatus::Stopped as u8),
            producer: ArcSwapOption::empty(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }

    /// Consumer group shared by this backbone's workers.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn load_status(&self) -> ComponentStatus {
        ComponentStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn store_status(&self, status: ComponentStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ComponentStatus, to: ComponentStatus) -> Result<(), ComponentStatus> {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ComponentStatus::from_u8)
    }

    /// Probes cluster membership until a member answers or `grace` elapses.
    fn await_cluster(&self, grace: Duration) -> Result<(), BackboneError> {
        let deadline = Instant::now() + grace;
        loop {
            match self.connector.describe_cluster() {
                Ok(members) if !members.is_empty() => {
                    debug!(members = members.len(), "log cluster reachable");
                    return Ok(());
                }
                Ok(_) => debug!("log cluster reported no members"),
                Err(err) => debug!(error = %err, "log cluster probe failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BackboneError::ClusterUnavailable(grace));
            }
            thread::sleep(self.config.readiness_retry_interval.min(deadline - now));
        }
    }

    fn bring_up(&self, sink: Arc<dyn PacketSink>, grace: Duration) -> Result<(), BackboneError> {
        self.await_cluster(grace)?;

        let topic = self.config.log_topic();
        let producer = BackboneProducer::start(
            self.connector
                .create_producer(&self.config.producer_client_id())?,
            topic.clone(),
            self.config.node_name.clone(),
            Arc::clone(&self.codec),
            self.config.producer_threads,
            self.config.producer_queue_capacity,
        )?;

        let context = WorkerContext {
            node_name: self.config.node_name.clone(),
            codec: Arc::clone(&self.codec),
            sink,
            poll_timeout: self.config.poll_timeout,
            retry_interval: self.config.readiness_retry_interval,
        };
        let mut workers = Vec::with_capacity(self.config.concurrency_limit);
        for index in 0..self.config.concurrency_limit.max(1) {
            // Workers already spawned are stopped by drop on early return.
            let reader = self.connector.create_reader(
                &self.config.consumer_client_id(index),
                &self.group_id,
                &topic,
            )?;
            workers.push(ConsumerWorker::spawn(index, reader, context.clone())?);
        }

        *self.workers.lock() = workers;
        self.producer.store(Some(Arc::new(producer)));
        Ok(())
    }

    fn tear_down(&self) {
        let mut workers = std::mem::take(&mut *self.workers.lock());
        for worker in &workers {
            worker.signal_stop();
        }
        for worker in &mut workers {
            worker.join();
        }
        if let Some(producer) = self.producer.swap(None) {
            producer.shut_down();
        }
    }
}

impl<C: LogConnector> ServerBackbone for LogBackbone<C> {
    fn start_up(&self, sink: Arc<dyn PacketSink>, grace: Duration) -> Result<(), BackboneError> {
        loop {
            match self.transition(ComponentStatus::Stopped, ComponentStatus::Starting) {
                Ok(()) => break,
                Err(ComponentStatus::Started) => return Ok(()),
                Err(_) => thread::sleep(self.config.status_poll_interval),
            }
        }

        match self.bring_up(sink, grace) {
            Ok(()) => {
                self.store_status(ComponentStatus::Started);
                info!(
                    node = %self.config.node_name,
                    topic = %self.config.log_topic(),
                    group = %self.group_id,
                    workers = self.config.concurrency_limit.max(1),
                    "backbone started"
                );
                Ok(())
            }
            Err(err) => {
                self.store_status(ComponentStatus::Stopped);
                warn!(node = %self.config.node_name, error = %err, "backbone failed to start");
                Err(err)
            }
        }
    }

    fn shut_down(&self) {
        loop {
            match self.transition(ComponentStatus::Started, ComponentStatus::Stopping) {
                Ok(()) => break,
                Err(ComponentStatus::Stopped) => return,
                Err(_) => thread::sleep(self.config.status_poll_interval),
            }
        }

        self.tear_down();
        self.store_status(ComponentStatus::Stopped);
        info!(node = %self.config.node_name, "backbone stopped");
    }

    fn status(&self) -> ComponentStatus {
        self.load_status()
    }

    fn publish(&self, packet: &Packet) -> Result<(), BackboneError> {
        let status = self.load_status();
        if status != ComponentStatus::Started {
            return Err(BackboneError::NotStarted(status));
        }
        match self.producer.load_full() {
            Some(producer) => {
                producer.publish(packet);
                Ok(())
            }
            None => Err(BackboneError::NotStarted(self.load_status())),
        }
    }
}

impl<C: LogConnector> Drop for LogBackbone<C> {
    fn drop(&mut self) {
        self.tear_down();
    }
}
