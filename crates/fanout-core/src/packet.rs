use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel_id::ChannelId;

/// One published message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Optional client-assigned message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Application payload.
    pub data: Value,
}

impl Message {
    pub fn new(data: Value) -> Self {
        Self { id: None, data }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Immutable ordered batch of messages addressed to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    sender: Option<String>,
    channel_id: ChannelId,
    messages: Vec<Message>,
}

impl Packet {
    pub fn new(sender: Option<String>, channel_id: ChannelId, messages: Vec<Message>) -> Self {
        Self {
            sender,
            channel_id,
            messages,
        }
    }

    /// Id of the publishing session, if the packet came from one.
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Same sender and channel with a replacement message list.
    pub fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            sender: self.sender.clone(),
            channel_id: self.channel_id.clone(),
            messages,
        }
    }
}

/// What a session is handed: either send-now or batch until a deadline.
#[derive(Debug, Clone)]
pub enum Delivery {
    Immediate(Arc<Packet>),
    Lazy {
        packet: Arc<Packet>,
        /// Absolute flush deadline in epoch milliseconds.
        flush_deadline: i64,
    },
}

impl Delivery {
    pub fn packet(&self) -> &Packet {
        match self {
            Delivery::Immediate(packet) => packet,
            Delivery::Lazy { packet, .. } => packet,
        }
    }

    pub fn flush_deadline(&self) -> Option<i64> {
        match self {
            Delivery::Immediate(_) => None,
            Delivery::Lazy { flush_deadline, .. } => Some(*flush_deadline),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Delivery::Lazy { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{Delivery, Message, Packet};
    use crate::channel_id::ChannelId;

    fn packet() -> Packet {
        Packet::new(
            Some("s-1".into()),
            ChannelId::parse("/chat/room1").expect("valid"),
            vec![
                Message::new(json!({"text": "a"})),
                Message::new(json!({"text": "b"})).with_id("m-2"),
            ],
        )
    }

    #[test]
    fn with_messages_keeps_sender_and_channel() {
        let original = packet();
        let trimmed = original.with_messages(original.messages()[1..].to_vec());
        assert_eq!(trimmed.sender(), Some("s-1"));
        assert_eq!(trimmed.channel_id(), original.channel_id());
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed.messages()[0].id.as_deref(), Some("m-2"));
    }

    #[test]
    fn delivery_exposes_deadline_only_when_lazy() {
        let shared = Arc::new(packet());
        let now = Delivery::Immediate(Arc::clone(&shared));
        let later = Delivery::Lazy {
            packet: shared,
            flush_deadline: 42,
        };
        assert!(!now.is_lazy());
        assert_eq!(now.flush_deadline(), None);
        assert!(later.is_lazy());
        assert_eq!(later.flush_deadline(), Some(42));
        assert_eq!(later.packet().len(), 2);
    }
}
