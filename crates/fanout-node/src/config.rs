use std::time::Duration;

/// Channel engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long an idle channel survives before it may be swept.
    pub inactive_channel_lifetime: Duration,
    /// Interval between expired-channel sweeps.
    pub expired_channel_cycle: Duration,
    /// Flush window for lazy channels without their own timeout.
    pub max_lazy_timeout: Duration,
    /// Whether a publishing session receives its own messages by default.
    pub broadcast_to_publisher: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inactive_channel_lifetime: Duration::from_secs(30 * 60),
            expired_channel_cycle: Duration::from_secs(5 * 60),
            max_lazy_timeout: Duration::from_secs(5),
            broadcast_to_publisher: true,
        }
    }
}

impl EngineConfig {
    pub(crate) fn inactive_lifetime_millis(&self) -> i64 {
        duration_millis(self.inactive_channel_lifetime)
    }

    pub(crate) fn max_lazy_timeout_millis(&self) -> i64 {
        duration_millis(self.max_lazy_timeout)
    }
}

/// Replication backbone settings for one node.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    /// Identity stamped on every envelope this node produces.
    pub node_name: String,
    /// Logical topic shared by all nodes of a cluster.
    pub topic: String,
    /// Prefix applied to the log topic and client ids.
    pub topic_prefix: String,
    /// Number of consumer workers.
    pub concurrency_limit: usize,
    /// Bounded wait of a single poll.
    pub poll_timeout: Duration,
    /// Sleep between cluster readiness probes.
    pub readiness_retry_interval: Duration,
    /// Sleep while waiting on a concurrent start or stop.
    pub status_poll_interval: Duration,
    /// Producer pool threads.
    pub producer_threads: usize,
    /// Queued sends before publishers transmit on their own thread.
    pub producer_queue_capacity: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            node_name: "node".to_string(),
            topic: "fanout".to_string(),
            topic_prefix: "fanout".to_string(),
            concurrency_limit: 1,
            poll_timeout: Duration::from_secs(3),
            readiness_retry_interval: Duration::from_secs(1),
            status_poll_interval: Duration::from_millis(100),
            producer_threads: 1,
            producer_queue_capacity: 1024,
        }
    }
}

impl BackboneConfig {
    pub fn new(node_name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Name of the log topic carrying envelopes.
    pub fn log_topic(&self) -> String {
        format!("{}-{}", self.topic_prefix, self.topic)
    }

    pub fn producer_client_id(&self) -> String {
        format!(
            "{}-producer-{}-{}",
            self.topic_prefix, self.topic, self.node_name
        )
    }

    pub fn consumer_client_id(&self, index: usize) -> String {
        format!(
            "{}-consumer-{}-{}-{}",
            self.topic_prefix, index, self.topic, self.node_name
        )
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
