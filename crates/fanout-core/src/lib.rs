//! Core fanout primitives shared across crates.
//!
//! Includes hierarchical channel identifiers, message/packet types, the
//! session delivery contract, and base errors.

pub mod channel_id;
pub mod error;
pub mod packet;
pub mod session;
pub mod time;

pub use channel_id::{ChannelId, DEEP_WILD, META_SEGMENT, SERVICE_SEGMENT, WILD};
pub use error::{ChannelIdError, SessionError};
pub use packet::{Delivery, Message, Packet};
pub use session::{RecordingSession, Session};
