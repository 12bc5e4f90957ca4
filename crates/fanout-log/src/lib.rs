//! Replicated log abstractions for fanout.
//!
//! The backbone only depends on the producer/reader/connector traits defined
//! here. [`memory::InMemoryLog`] is a partitioned log with consumer groups for
//! tests and simulations.

pub mod client;
pub mod memory;

pub use client::{
    ClusterMember, LogConnector, LogError, LogProducer, LogReader, LogRecord, PollBatch,
    TopicPartition, Waker,
};
pub use memory::{InMemoryLog, InMemoryLogConfig, InMemoryProducer, InMemoryReader, OffsetReset};
