use std::sync::Mutex;

use crate::error::SessionError;
use crate::packet::Delivery;

/// Delivery contract implemented by the embedding server's sessions.
pub trait Session: Send + Sync {
    /// Stable session identifier used for subscription and dedup keys.
    fn id(&self) -> &str;
    /// Hands a delivery to the session's transport.
    fn send(&self, delivery: Delivery) -> Result<(), SessionError>;
}

/// In-memory session for tests and simulations.
#[derive(Debug, Default)]
pub struct RecordingSession {
    id: String,
    received: Mutex<Vec<Delivery>>,
    closed: Mutex<bool>,
}

impl RecordingSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Further sends fail with [`SessionError::Closed`].
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    /// Drains and returns all deliveries captured so far.
    pub fn take_received(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.received.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Session for RecordingSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, delivery: Delivery) -> Result<(), SessionError> {
        if *self.closed.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(SessionError::Closed(self.id.clone()));
        }
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delivery);
        Ok(())
    }
}
