use std::collections::HashSet;
use std::sync::Arc;

use fanout_core::Packet;
use tracing::trace;

use crate::backbone::PacketSink;
use crate::registry::ChannelRegistry;

/// Fans a packet out to the target channel and every registered channel
/// overlapping it, delivering at most once per session.
pub struct DeliveryPipeline {
    registry: Arc<ChannelRegistry>,
}

impl DeliveryPipeline {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Delivers `packet` locally and returns how many sessions were reached.
    pub fn deliver(&self, packet: &Packet) -> usize {
        let target_id = packet.channel_id();
        let (target, _) = self.registry.create_if_absent(target_id, &[]);
        let mut delivered = HashSet::new();
        let mut reached = target.send(packet, &mut delivered);

        if target_id.is_wildcard() {
            for channel in self.registry.channels() {
                let id = channel.id();
                if id != target_id
                    && target_id.matches(id)
                    && channel.subscriber_count() > 0
                {
                    reached += channel.send(packet, &mut delivered);
                }
            }
        } else {
            for wild in target_id.wilds() {
                if let Some(channel) = self.registry.find(&wild) {
                    if channel.subscriber_count() > 0 {
                        reached += channel.send(packet, &mut delivered);
                    }
                }
            }
        }

        trace!(channel = %target_id, sessions = reached, "packet delivered locally");
        reached
    }
}

impl PacketSink for DeliveryPipeline {
    fn deliver_local(&self, packet: Packet) {
        self.deliver(&packet);
    }
}
