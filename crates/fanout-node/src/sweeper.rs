use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fanout_core::time::now_millis;
use tracing::{debug, error};

use crate::registry::ChannelRegistry;

/// Background thread removing expired channels every cycle.
pub(crate) struct ExpiredChannelSweeper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiredChannelSweeper {
    pub(crate) fn spawn(registry: Arc<ChannelRegistry>, cycle: Duration) -> io::Result<Self> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("fanout-channel-sweeper".to_string())
            .spawn(move || loop {
                match signal.recv_timeout(cycle) {
                    Err(RecvTimeoutError::Timeout) => {
                        let removed = registry.remove_expired(now_millis());
                        if !removed.is_empty() {
                            debug!(count = removed.len(), "swept expired channels");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("channel sweeper panicked");
            }
        }
    }
}

impl Drop for ExpiredChannelSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
