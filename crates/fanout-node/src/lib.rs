//! Channel engine and log-backed replication backbone.
//!
//! Channels track subscribers, listeners and expiration; the delivery
//! pipeline fans packets out across overlapping channels at most once per
//! session; the backbone replicates local publications to every other node
//! over a shared partitioned log.

pub mod backbone;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod engine;
pub mod listener;
pub mod producer;
pub mod registry;
mod sweeper;

pub use backbone::{BackboneError, ComponentStatus, LogBackbone, PacketSink, ServerBackbone};
pub use channel::{Channel, ChannelStateError};
pub use config::{BackboneConfig, EngineConfig};
pub use engine::{Engine, EngineError};
pub use listener::{
    ChannelLifecycleListener, ChannelListener, ListenerError, ListenerId, ListenerStrength,
    MessageFilter, MessageListener, MessageView, Promise, SubscriptionListener,
};
