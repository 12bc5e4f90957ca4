use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// One partition of one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: TopicPartition,
    pub offset: u64,
    pub value: Bytes,
}

/// Records returned by one poll, grouped by partition in arrival order.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    partitions: Vec<(TopicPartition, Vec<LogRecord>)>,
}

impl PollBatch {
    /// Appends a record to its partition group, keeping arrival order.
    pub fn push(&mut self, record: LogRecord) {
        match self
            .partitions
            .iter_mut()
            .find(|(partition, _)| *partition == record.partition)
        {
            Some((_, records)) => records.push(record),
            None => self
                .partitions
                .push((record.partition.clone(), vec![record])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|(_, records)| records.is_empty())
    }

    pub fn record_count(&self) -> usize {
        self.partitions.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn partitions(&self) -> impl Iterator<Item = (&TopicPartition, &[LogRecord])> {
        self.partitions
            .iter()
            .map(|(partition, records)| (partition, records.as_slice()))
    }
}

impl FromIterator<LogRecord> for PollBatch {
    fn from_iter<I: IntoIterator<Item = LogRecord>>(iter: I) -> Self {
        let mut batch = PollBatch::default();
        for record in iter {
            batch.push(record);
        }
        batch
    }
}

/// A broker reachable during the readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub id: u32,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum LogError {
    /// A blocked poll was interrupted through its [`Waker`].
    #[error("poll interrupted by wakeup")]
    Wakeup,
    #[error("log client is closed")]
    Closed,
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("commit failed for {partition}: {reason}")]
    Commit {
        partition: TopicPartition,
        reason: String,
    },
}

/// Interrupts a reader blocked in [`LogReader::poll`] from another thread.
pub trait Waker: Send + Sync {
    fn wakeup(&self);
}

/// Write side of the log. Implementations are shared by the producer pool.
pub trait LogProducer: Send + Sync {
    /// Appends `value` to `topic`; partition choice is the client's.
    fn publish(&self, topic: &str, value: &[u8]) -> Result<(), LogError>;
}

/// Read side of the log, owned by exactly one worker thread.
pub trait LogReader: Send {
    /// Waits up to `timeout` for records on the assigned partitions.
    ///
    /// Returns [`LogError::Wakeup`] when interrupted through [`LogReader::waker`].
    fn poll(&mut self, timeout: Duration) -> Result<PollBatch, LogError>;
    /// Acknowledges consumption of `partition` up to (excluding) `offset`.
    fn commit(&mut self, partition: &TopicPartition, offset: u64) -> Result<(), LogError>;
    /// Handle that can interrupt a blocked poll.
    fn waker(&self) -> Arc<dyn Waker>;
    /// Releases the reader's group membership.
    fn close(&mut self);
}

/// Factory for producers and readers against one cluster.
pub trait LogConnector: Send + Sync + 'static {
    type Producer: LogProducer + 'static;
    type Reader: LogReader + 'static;

    /// Returns the currently reachable cluster members.
    fn describe_cluster(&self) -> Result<Vec<ClusterMember>, LogError>;
    fn create_producer(&self, client_id: &str) -> Result<Self::Producer, LogError>;
    fn create_reader(
        &self,
        client_id: &str,
        group_id: &str,
        topic: &str,
    ) -> Result<Self::Reader, LogError>;
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{LogRecord, PollBatch, TopicPartition};

    fn record(partition: u32, offset: u64) -> LogRecord {
        LogRecord {
            partition: TopicPartition::new("t", partition),
            offset,
            value: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn poll_batch_groups_by_partition_in_arrival_order() {
        let batch: PollBatch = vec![record(1, 0), record(0, 5), record(1, 1), record(0, 6)]
            .into_iter()
            .collect();

        let grouped: Vec<(u32, Vec<u64>)> = batch
            .partitions()
            .map(|(p, records)| (p.partition, records.iter().map(|r| r.offset).collect()))
            .collect();
        assert_eq!(grouped, vec![(1, vec![0, 1]), (0, vec![5, 6])]);
        assert_eq!(batch.record_count(), 4);
        assert!(!batch.is_empty());
        assert!(PollBatch::default().is_empty());
    }

    #[test]
    fn topic_partition_display() {
        assert_eq!(TopicPartition::new("fanout-chat", 2).to_string(), "fanout-chat-2");
    }
}
