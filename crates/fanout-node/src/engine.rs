use std::sync::Arc;
use std::time::Duration;

use fanout_core::{ChannelId, ChannelIdError, Message, Packet, Session};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::backbone::{BackboneError, ComponentStatus, PacketSink, ServerBackbone};
use crate::channel::{Channel, ChannelStateError};
use crate::config::EngineConfig;
use crate::delivery::DeliveryPipeline;
use crate::listener::ChannelLifecycleListener;
use crate::registry::{ChannelInitializer, ChannelRegistry};
use crate::sweeper::ExpiredChannelSweeper;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid channel id: {0}")]
    ChannelId(#[from] ChannelIdError),
    #[error("channel state error: {0}")]
    ChannelState(#[from] ChannelStateError),
    /// Local delivery already happened; replication could not be queued.
    #[error("backbone unavailable: {0}")]
    BackboneUnavailable(#[source] BackboneError),
    #[error("backbone failed to start: {0}")]
    StartUp(#[source] BackboneError),
    #[error("failed to spawn channel sweeper: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Channel engine facade embedded by a server.
///
/// Owns the channel registry; publishing delivers locally first and then
/// forwards to the backbone when one is configured.
pub struct Engine {
    registry: Arc<ChannelRegistry>,
    pipeline: Arc<DeliveryPipeline>,
    backbone: Option<Arc<dyn ServerBackbone>>,
    sweeper: Mutex<Option<ExpiredChannelSweeper>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(ChannelRegistry::new(config));
        Self {
            pipeline: Arc::new(DeliveryPipeline::new(Arc::clone(&registry))),
            registry,
            backbone: None,
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_backbone(config: EngineConfig, backbone: Arc<dyn ServerBackbone>) -> Self {
        Self {
            backbone: Some(backbone),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn backbone_status(&self) -> Option<ComponentStatus> {
        self.backbone.as_ref().map(|backbone| backbone.status())
    }

    /// Starts the backbone (waiting up to `grace` for its cluster) and the sweeper.
    pub fn start_up(&self, grace: Duration) -> Result<(), EngineError> {
        if let Some(backbone) = &self.backbone {
            let sink: Arc<dyn PacketSink> = self.pipeline.clone();
            backbone.start_up(sink, grace).map_err(EngineError::StartUp)?;
        }

        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(ExpiredChannelSweeper::spawn(
                Arc::clone(&self.registry),
                self.config().expired_channel_cycle,
            )?);
        }
        info!(channels = self.registry.len(), "engine started");
        Ok(())
    }

    pub fn shut_down(&self) {
        if let Some(backbone) = &self.backbone {
            backbone.shut_down();
        }
        if let Some(mut sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        info!("engine stopped");
    }

    /// Publishes one message to `channel_id` on behalf of `from`.
    pub fn publish(
        &self,
        from: Option<&str>,
        channel_id: &ChannelId,
        data: Value,
    ) -> Result<usize, EngineError> {
        self.publish_packet(Packet::new(
            from.map(str::to_string),
            channel_id.clone(),
            vec![Message::new(data)],
        ))
    }

    /// Parses `path` and publishes one message to it.
    pub fn publish_to(
        &self,
        from: Option<&str>,
        path: &str,
        data: Value,
    ) -> Result<usize, EngineError> {
        let channel_id = ChannelId::parse(path)?;
        self.publish(from, &channel_id, data)
    }

    /// Delivers `packet` locally, then forwards it to the backbone.
    ///
    /// Returns the number of local sessions reached.
    pub fn publish_packet(&self, packet: Packet) -> Result<usize, EngineError> {
        let reached = self.pipeline.deliver(&packet);
        if let Some(backbone) = &self.backbone {
            if let Err(err) = backbone.publish(&packet) {
                warn!(channel = %packet.channel_id(), error = %err, "packet not replicated");
                return Err(EngineError::BackboneUnavailable(err));
            }
        }
        Ok(reached)
    }

    /// Local-only delivery; never forwarded to the backbone.
    pub fn deliver_local(&self, packet: &Packet) -> usize {
        self.pipeline.deliver(packet)
    }

    /// Subscribes `session`, retrying on a fresh channel if the one found was
    /// detached from the registry in the meantime.
    pub fn subscribe(&self, channel_id: &ChannelId, session: Arc<dyn Session>) -> bool {
        loop {
            let (channel, _) = self.registry.create_if_absent(channel_id, &[]);
            if channel.subscribe(Arc::clone(&session)) {
                return true;
            }
            if !channel.is_terminated() {
                return false;
            }
        }
    }

    pub fn unsubscribe(&self, channel_id: &ChannelId, session_id: &str) -> bool {
        self.registry
            .find(channel_id)
            .is_some_and(|channel| channel.unsubscribe(session_id))
    }

    /// Removes `session_id` from every channel; returns how many it left.
    pub fn unsubscribe_all(&self, session_id: &str) -> usize {
        self.registry
            .channels()
            .iter()
            .filter(|channel| channel.unsubscribe(session_id))
            .count()
    }

    /// Channels `session_id` is currently subscribed to.
    pub fn subscriptions(&self, session_id: &str) -> Vec<ChannelId> {
        self.registry
            .channels()
            .iter()
            .filter(|channel| channel.is_subscribed(session_id))
            .map(|channel| channel.id().clone())
            .collect()
    }

    pub fn create_channel_if_absent(
        &self,
        channel_id: &ChannelId,
        initializers: &[ChannelInitializer<'_>],
    ) -> (Arc<Channel>, bool) {
        self.registry.create_if_absent(channel_id, initializers)
    }

    pub fn find_channel(&self, channel_id: &ChannelId) -> Option<Arc<Channel>> {
        self.registry.find(channel_id)
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.registry.channels()
    }

    pub fn remove_channel(&self, channel_id: &ChannelId) -> Result<Option<Arc<Channel>>, EngineError> {
        Ok(self.registry.remove(channel_id)?)
    }

    pub fn add_channel_lifecycle_listener(&self, listener: Arc<dyn ChannelLifecycleListener>) {
        self.registry.add_lifecycle_listener(listener);
    }
}
