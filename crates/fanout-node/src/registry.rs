use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use fanout_core::ChannelId;
use parking_lot::ReentrantMutex;
use tracing::debug;

use crate::channel::{Channel, ChannelStateError};
use crate::config::EngineConfig;
use crate::listener::ChannelLifecycleListener;

/// First-use hook run once on a freshly created channel.
pub type ChannelInitializer<'a> = &'a dyn Fn(&Channel);

/// Concurrent map of live channels keyed by channel id string.
pub struct ChannelRegistry {
    config: EngineConfig,
    channels: DashMap<String, Arc<Channel>>,
    /// Serializes creation so a channel is published only after its
    /// initializers ran. Reentrant for initializers that create channels.
    creation: ReentrantMutex<()>,
    lifecycle_listeners: ArcSwap<Vec<Arc<dyn ChannelLifecycleListener>>>,
}

impl ChannelRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            channels: DashMap::new(),
            creation: ReentrantMutex::new(()),
            lifecycle_listeners: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_lifecycle_listener(&self, listener: Arc<dyn ChannelLifecycleListener>) {
        self.lifecycle_listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    /// Returns the channel for `id`, creating it if needed.
    ///
    /// Only the creating caller runs `initializers`; the flag tells whether it did.
    /// The channel becomes visible to other callers once they have run.
    pub fn create_if_absent(
        &self,
        id: &ChannelId,
        initializers: &[ChannelInitializer<'_>],
    ) -> (Arc<Channel>, bool) {
        if let Some(existing) = self.find(id) {
            return (existing, false);
        }

        let _creating = self.creation.lock();
        if let Some(existing) = self.find(id) {
            return (existing, false);
        }
        let channel = Arc::new(Channel::new(id.clone(), &self.config));
        for initialize in initializers {
            initialize(channel.as_ref());
        }
        channel.mark_initialized();
        self.channels.insert(id.id().to_string(), Arc::clone(&channel));
        debug!(channel = %id, "channel created");

        for listener in self.lifecycle_listeners.load().iter() {
            listener.channel_added(&channel);
        }
        (channel, true)
    }

    pub fn find(&self, id: &ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(id.id()).map(|entry| Arc::clone(entry.value()))
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Detaches a non-persistent channel and unsubscribes all of its sessions.
    ///
    /// The detached channel is terminated and refuses later subscriptions.
    pub fn remove(&self, id: &ChannelId) -> Result<Option<Arc<Channel>>, ChannelStateError> {
        let Some(channel) = self.find(id) else {
            return Ok(None);
        };
        let mut outcome = Ok(());
        let removed = self.channels.remove_if(id.id(), |_, current| {
            Arc::ptr_eq(current, &channel) && {
                outcome = current.terminate();
                outcome.is_ok()
            }
        });
        outcome?;
        if removed.is_none() {
            return Ok(None);
        }

        channel.unsubscribe_all();
        self.notify_removed(id);
        Ok(Some(channel))
    }

    /// Drops every channel that reports expired at `now`.
    pub fn remove_expired(&self, now: i64) -> Vec<ChannelId> {
        let candidates: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|entry| entry.value().has_expired(now))
            .map(|entry| entry.value().id().clone())
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if self
                .channels
                .remove_if(id.id(), |_, channel| channel.terminate_if_expired(now))
                .is_some()
            {
                self.notify_removed(&id);
                removed.push(id);
            }
        }
        removed
    }

    fn notify_removed(&self, id: &ChannelId) {
        debug!(channel = %id, "channel removed");
        for listener in self.lifecycle_listeners.load().iter() {
            listener.channel_removed(id);
        }
    }
}
