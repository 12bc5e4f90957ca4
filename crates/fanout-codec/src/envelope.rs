use fanout_core::Packet;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Envelope schema version for `EnvelopeV1`.
pub const ENVELOPE_V1_VERSION: u16 = 1;

/// Backbone wire record: the producing node plus the packet it published.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvelopeV1 {
    /// Wire version.
    pub version: u16,
    /// Name of the node that published the packet onto the log.
    pub node_name: String,
    /// Replicated packet.
    pub packet: Packet,
}

#[derive(Serialize)]
struct EnvelopeV1Ref<'a> {
    version: u16,
    node_name: &'a str,
    packet: &'a Packet,
}

impl EnvelopeV1 {
    /// Validates envelope schema and field consistency.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.version != ENVELOPE_V1_VERSION {
            return Err(CodecError::InvalidEnvelope("unsupported envelope version"));
        }
        if self.node_name.is_empty() {
            return Err(CodecError::InvalidEnvelope("node name must not be empty"));
        }
        Ok(())
    }

    /// Whether this envelope was produced by `node_name`.
    pub fn originated_at(&self, node_name: &str) -> bool {
        self.node_name == node_name
    }
}

/// Encodes a packet with its origin node to canonical CBOR bytes.
pub fn encode_envelope_cbor(node_name: &str, packet: &Packet) -> Result<Vec<u8>, CodecError> {
    if node_name.is_empty() {
        return Err(CodecError::InvalidEnvelope("node name must not be empty"));
    }
    let mut out = Vec::new();
    ciborium::ser::into_writer(
        &EnvelopeV1Ref {
            version: ENVELOPE_V1_VERSION,
            node_name,
            packet,
        },
        &mut out,
    )?;
    Ok(out)
}

/// Decodes and validates an envelope from CBOR bytes.
pub fn decode_envelope_cbor(bytes: &[u8]) -> Result<EnvelopeV1, CodecError> {
    let envelope: EnvelopeV1 = ciborium::de::from_reader(bytes)?;
    envelope.validate()?;
    Ok(envelope)
}

/// Packet (de)serialization contract used by the backbone.
pub trait PacketCodec: Send + Sync {
    fn encode(&self, node_name: &str, packet: &Packet) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<EnvelopeV1, CodecError>;
}

/// Default codec backed by [`encode_envelope_cbor`] / [`decode_envelope_cbor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CborPacketCodec;

impl PacketCodec for CborPacketCodec {
    fn encode(&self, node_name: &str, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        encode_envelope_cbor(node_name, packet)
    }

    fn decode(&self, bytes: &[u8]) -> Result<EnvelopeV1, CodecError> {
        decode_envelope_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use fanout_core::{ChannelId, Message, Packet};
    use serde::Serialize;
    use serde_json::json;

    use super::{decode_envelope_cbor, encode_envelope_cbor, ENVELOPE_V1_VERSION};
    use crate::error::CodecError;

    fn sample_packet() -> Packet {
        Packet::new(
            Some("session-a".into()),
            ChannelId::parse("/chat/room1").expect("valid"),
            vec![Message::new(json!({"text": "hi", "n": 3}))],
        )
    }

    #[test]
    fn decode_restores_origin_and_packet() {
        let bytes = encode_envelope_cbor("node-a", &sample_packet()).expect("encode");
        let envelope = decode_envelope_cbor(&bytes).expect("decode");
        assert_eq!(envelope.version, ENVELOPE_V1_VERSION);
        assert!(envelope.originated_at("node-a"));
        assert!(!envelope.originated_at("node-b"));
        assert_eq!(envelope.packet, sample_packet());
    }

    #[test]
    fn encode_rejects_empty_node_name() {
        assert!(matches!(
            encode_envelope_cbor("", &sample_packet()),
            Err(CodecError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_version() {
        #[derive(Serialize)]
        struct Future<'a> {
            version: u16,
            node_name: &'a str,
            packet: Packet,
        }

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(
            &Future {
                version: 9,
                node_name: "node-a",
                packet: sample_packet(),
            },
            &mut bytes,
        )
        .expect("encode");

        assert!(matches!(
            decode_envelope_cbor(&bytes),
            Err(CodecError::InvalidEnvelope("unsupported envelope version"))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_envelope_cbor(&[0xff, 0x00, 0x13]),
            Err(CodecError::Decode(_))
        ));
    }
}
