use std::io;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fanout_codec::PacketCodec;
use fanout_core::Packet;
use fanout_log::LogProducer;
use parking_lot::Mutex;
use tracing::{debug, error};

struct Transmitter<P> {
    producer: P,
    topic: String,
}

impl<P: LogProducer> Transmitter<P> {
    fn transmit(&self, envelope: &[u8]) {
        if let Err(err) = self.producer.publish(&self.topic, envelope) {
            error!(topic = %self.topic, error = %err, "backbone transmission failed");
        }
    }
}

/// Encodes local publications and ships them to the log on a small pool.
///
/// When the pool queue is full the publishing thread sends the envelope itself.
pub struct BackboneProducer<P> {
    node_name: String,
    codec: Arc<dyn PacketCodec>,
    transmitter: Arc<Transmitter<P>>,
    queue: Mutex<Option<SyncSender<Vec<u8>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: LogProducer + 'static> BackboneProducer<P> {
    pub fn start(
        producer: P,
        topic: impl Into<String>,
        node_name: impl Into<String>,
        codec: Arc<dyn PacketCodec>,
        threads: usize,
        queue_capacity: usize,
    ) -> io::Result<Self> {
        let transmitter = Arc::new(Transmitter {
            producer,
            topic: topic.into(),
        });
        let (queue, jobs) = mpsc::sync_channel::<Vec<u8>>(queue_capacity.max(1));
        let jobs = Arc::new(Mutex::new(jobs));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let transmitter = Arc::clone(&transmitter);
            let jobs = Arc::clone(&jobs);
            let spawned = thread::Builder::new()
                .name(format!("fanout-producer-{index}"))
                .spawn(move || drain(&transmitter, &jobs));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    drop(queue);
                    join_all(workers);
                    return Err(err);
                }
            }
        }

        Ok(Self {
            node_name: node_name.into(),
            codec,
            transmitter,
            queue: Mutex::new(Some(queue)),
            workers: Mutex::new(workers),
        })
    }

    /// Serializes `packet` and hands it to the pool; failures are logged.
    pub fn publish(&self, packet: &Packet) {
        let envelope = match self.codec.encode(&self.node_name, packet) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(channel = %packet.channel_id(), error = %err, "failed to encode envelope");
                return;
            }
        };

        let queue = self.queue.lock().clone();
        let Some(queue) = queue else {
            self.transmitter.transmit(&envelope);
            return;
        };
        match queue.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => {
                debug!("producer pool saturated; sending on caller thread");
                self.transmitter.transmit(&envelope);
            }
            Err(TrySendError::Disconnected(envelope)) => self.transmitter.transmit(&envelope),
        }
    }

    /// Flushes queued envelopes and joins the pool threads.
    pub fn shut_down(&self) {
        drop(self.queue.lock().take());
        join_all(std::mem::take(&mut *self.workers.lock()));
    }
}

impl<P> Drop for BackboneProducer<P> {
    fn drop(&mut self) {
        drop(self.queue.get_mut().take());
        join_all(std::mem::take(self.workers.get_mut()));
    }
}

fn drain<P: LogProducer>(transmitter: &Transmitter<P>, jobs: &Mutex<Receiver<Vec<u8>>>) {
    loop {
        let next = jobs.lock().recv();
        match next {
            Ok(envelope) => transmitter.transmit(&envelope),
            Err(_) => break,
        }
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        if worker.join().is_err() {
            error!("producer worker panicked");
        }
    }
}
