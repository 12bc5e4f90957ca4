use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::client::{
    ClusterMember, LogConnector, LogError, LogProducer, LogReader, LogRecord, PollBatch,
    TopicPartition, Waker,
};

/// Where a reader starts on a partition its group has never committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    Earliest,
    #[default]
    Latest,
}

#[derive(Debug, Clone)]
pub struct InMemoryLogConfig {
    /// Partitions created per topic on first use.
    pub partitions: u32,
    /// Upper bound on records returned by one poll.
    pub max_poll_records: usize,
    pub offset_reset: OffsetReset,
}

impl Default for InMemoryLogConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            max_poll_records: 500,
            offset_reset: OffsetReset::Latest,
        }
    }
}

#[derive(Debug, Default)]
struct GroupState {
    committed: HashMap<u32, u64>,
    members: Vec<u64>,
}

#[derive(Debug)]
struct ReaderState {
    group_id: String,
    topic: String,
    assigned: Vec<u32>,
    positions: HashMap<u32, u64>,
    woken: bool,
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<Bytes>>>,
    groups: HashMap<(String, String), GroupState>,
    readers: HashMap<u64, ReaderState>,
    next_reader_id: u64,
    next_partition: u32,
    unavailable: bool,
    failing_probes: u32,
    fail_sends: bool,
}

impl LogState {
    fn partitions_mut(&mut self, topic: &str, count: u32) -> &mut Vec<Vec<Bytes>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count.max(1) as usize])
    }

    /// Spreads the topic's partitions round-robin over the group's readers.
    fn rebalance(&mut self, group_id: &str, topic: &str, config: &InMemoryLogConfig) {
        let ends: Vec<u64> = self
            .partitions_mut(topic, config.partitions)
            .iter()
            .map(|log| log.len() as u64)
            .collect();
        let key = (group_id.to_string(), topic.to_string());
        let (members, committed) = match self.groups.get(&key) {
            Some(group) => (group.members.clone(), group.committed.clone()),
            None => return,
        };

        for (slot, reader_id) in members.iter().enumerate() {
            let Some(reader) = self.readers.get_mut(reader_id) else {
                continue;
            };
            let assigned: Vec<u32> = (0..ends.len() as u32)
                .filter(|p| *p as usize % members.len() == slot)
                .collect();
            let mut positions = HashMap::with_capacity(assigned.len());
            for p in &assigned {
                let start = reader
                    .positions
                    .get(p)
                    .or_else(|| committed.get(p))
                    .copied()
                    .unwrap_or(match config.offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => ends[*p as usize],
                    });
                positions.insert(*p, start);
            }
            reader.assigned = assigned;
            reader.positions = positions;
        }
    }

    fn take_ready(&mut self, reader_id: u64, max_records: usize) -> Result<PollBatch, LogError> {
        let reader = self.readers.get_mut(&reader_id).ok_or(LogError::Closed)?;
        if reader.woken {
            reader.woken = false;
            return Err(LogError::Wakeup);
        }

        let mut batch = PollBatch::default();
        let Some(logs) = self.topics.get(&reader.topic) else {
            return Ok(batch);
        };
        let mut budget = max_records;
        for p in &reader.assigned {
            let log = &logs[*p as usize];
            let position = reader.positions.entry(*p).or_insert(0);
            while budget > 0 && (*position as usize) < log.len() {
                batch.push(LogRecord {
                    partition: TopicPartition::new(reader.topic.clone(), *p),
                    offset: *position,
                    value: log[*position as usize].clone(),
                });
                *position += 1;
                budget -= 1;
            }
        }
        Ok(batch)
    }
}

struct Shared {
    config: InMemoryLogConfig,
    state: Mutex<LogState>,
    changed: Condvar,
}

/// Partitioned in-memory log with consumer groups, for tests and simulations.
///
/// Clones share the same log.
#[derive(Clone)]
pub struct InMemoryLog {
    shared: Arc<Shared>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new(InMemoryLogConfig::default())
    }
}

impl InMemoryLog {
    pub fn new(config: InMemoryLogConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(LogState::default()),
                changed: Condvar::new(),
            }),
        }
    }

    /// Appends `value` to an explicit partition and returns its offset.
    pub fn append_to_partition(&self, topic: &str, partition: u32, value: &[u8]) -> u64 {
        let mut state = self.shared.state.lock();
        let logs = state.partitions_mut(topic, self.shared.config.partitions);
        let index = (partition as usize).min(logs.len() - 1);
        logs[index].push(Bytes::copy_from_slice(value));
        let offset = logs[index].len() as u64 - 1;
        self.shared.changed.notify_all();
        offset
    }

    /// When set, cluster probes and new readers fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.state.lock().unavailable = unavailable;
    }

    /// Makes the next `count` cluster probes fail.
    pub fn fail_next_probes(&self, count: u32) {
        self.shared.state.lock().failing_probes = count;
    }

    /// When set, producer sends fail.
    pub fn set_fail_sends(&self, fail_sends: bool) {
        self.shared.state.lock().fail_sends = fail_sends;
    }

    /// Total records appended to `topic` across all partitions.
    pub fn topic_len(&self, topic: &str) -> usize {
        self.shared
            .state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |logs| logs.iter().map(Vec::len).sum())
    }

    /// Committed offset of `group_id` on one partition, if any.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: u32) -> Option<u64> {
        self.shared
            .state
            .lock()
            .groups
            .get(&(group_id.to_string(), topic.to_string()))
            .and_then(|group| group.committed.get(&partition).copied())
    }

    /// Consumer groups that currently have at least one reader on `topic`.
    pub fn active_groups(&self, topic: &str) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut groups: Vec<String> = state
            .groups
            .iter()
            .filter(|((_, t), group)| t == topic && !group.members.is_empty())
            .map(|((g, _), _)| g.clone())
            .collect();
        groups.sort();
        groups
    }
}

/// Producer handle for [`InMemoryLog`]; partitions are chosen round-robin.
pub struct InMemoryProducer {
    log: InMemoryLog,
    client_id: String,
}

impl InMemoryProducer {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl LogProducer for InMemoryProducer {
    fn publish(&self, topic: &str, value: &[u8]) -> Result<(), LogError> {
        let shared = &self.log.shared;
        let mut state = shared.state.lock();
        if state.fail_sends {
            return Err(LogError::Send("in-memory log rejecting sends".to_string()));
        }
        let next = state.next_partition;
        state.next_partition = next.wrapping_add(1);
        let logs = state.partitions_mut(topic, shared.config.partitions);
        let index = next as usize % logs.len();
        logs[index].push(Bytes::copy_from_slice(value));
        shared.changed.notify_all();
        Ok(())
    }
}

/// Reader handle for [`InMemoryLog`]; joining or leaving rebalances the group.
pub struct InMemoryReader {
    log: InMemoryLog,
    id: u64,
    client_id: String,
    closed: bool,
}

impl InMemoryReader {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Partitions currently assigned to this reader.
    pub fn assignment(&self) -> Vec<u32> {
        self.log
            .shared
            .state
            .lock()
            .readers
            .get(&self.id)
            .map(|reader| reader.assigned.clone())
            .unwrap_or_default()
    }
}

struct InMemoryWaker {
    shared: Arc<Shared>,
    reader_id: u64,
}

impl Waker for InMemoryWaker {
    fn wakeup(&self) {
        let mut state = self.shared.state.lock();
        if let Some(reader) = state.readers.get_mut(&self.reader_id) {
            reader.woken = true;
        }
        self.shared.changed.notify_all();
    }
}

impl LogReader for InMemoryReader {
    fn poll(&mut self, timeout: Duration) -> Result<PollBatch, LogError> {
        if self.closed {
            return Err(LogError::Closed);
        }
        let deadline = Instant::now() + timeout;
        let shared = &self.log.shared;
        let mut state = shared.state.lock();
        loop {
            let batch = state.take_ready(self.id, shared.config.max_poll_records)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            shared.changed.wait_until(&mut state, deadline);
        }
    }

    fn commit(&mut self, partition: &TopicPartition, offset: u64) -> Result<(), LogError> {
        let mut state = self.log.shared.state.lock();
        let reader = state.readers.get(&self.id).ok_or(LogError::Closed)?;
        if reader.topic != partition.topic || !reader.assigned.contains(&partition.partition) {
            return Err(LogError::Commit {
                partition: partition.clone(),
                reason: "partition not assigned to this reader".to_string(),
            });
        }
        let key = (reader.group_id.clone(), reader.topic.clone());
        state
            .groups
            .entry(key)
            .or_default()
            .committed
            .insert(partition.partition, offset);
        Ok(())
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(InMemoryWaker {
            shared: Arc::clone(&self.log.shared),
            reader_id: self.id,
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let shared = &self.log.shared;
        let mut state = shared.state.lock();
        if let Some(reader) = state.readers.remove(&self.id) {
            let key = (reader.group_id.clone(), reader.topic.clone());
            if let Some(group) = state.groups.get_mut(&key) {
                group.members.retain(|member| *member != self.id);
            }
            state.rebalance(&reader.group_id, &reader.topic, &shared.config);
            debug!(client_id = %self.client_id, group_id = %reader.group_id, "in-memory reader left group");
        }
        shared.changed.notify_all();
    }
}

impl Drop for InMemoryReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl LogConnector for InMemoryLog {
    type Producer = InMemoryProducer;
    type Reader = InMemoryReader;

    fn describe_cluster(&self) -> Result<Vec<ClusterMember>, LogError> {
        let mut state = self.shared.state.lock();
        if state.unavailable {
            return Err(LogError::Unavailable("in-memory log marked unavailable".to_string()));
        }
        if state.failing_probes > 0 {
            state.failing_probes -= 1;
            return Err(LogError::Unavailable("probe failure injected".to_string()));
        }
        Ok(vec![ClusterMember {
            id: 0,
            host: "in-memory".to_string(),
            port: 0,
        }])
    }

    fn create_producer(&self, client_id: &str) -> Result<Self::Producer, LogError> {
        Ok(InMemoryProducer {
            log: self.clone(),
            client_id: client_id.to_string(),
        })
    }

    fn create_reader(
        &self,
        client_id: &str,
        group_id: &str,
        topic: &str,
    ) -> Result<Self::Reader, LogError> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.unavailable {
            return Err(LogError::Unavailable("in-memory log marked unavailable".to_string()));
        }

        let id = state.next_reader_id;
        state.next_reader_id += 1;
        state.readers.insert(
            id,
            ReaderState {
                group_id: group_id.to_string(),
                topic: topic.to_string(),
                assigned: Vec::new(),
                positions: HashMap::new(),
                woken: false,
            },
        );
        state
            .groups
            .entry((group_id.to_string(), topic.to_string()))
            .or_default()
            .members
            .push(id);
        state.rebalance(group_id, topic, &shared.config);
        debug!(client_id, group_id, topic, "in-memory reader joined group");

        Ok(InMemoryReader {
            log: self.clone(),
            id,
            client_id: client_id.to_string(),
            closed: false,
        })
    }
}
