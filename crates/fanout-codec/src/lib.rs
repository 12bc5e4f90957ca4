//! fanout wire codec primitives.
//!
//! Defines the backbone envelope schema and CBOR encode/decode helpers.

pub mod envelope;
pub mod error;

pub use envelope::{
    decode_envelope_cbor, encode_envelope_cbor, CborPacketCodec, EnvelopeV1, PacketCodec,
    ENVELOPE_V1_VERSION,
};
pub use error::CodecError;
