use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fanout_codec::{CodecError, PacketCodec};
use fanout_log::{LogError, LogReader, LogRecord, PollBatch, Waker};
use tracing::{debug, error, info, warn};

use crate::backbone::PacketSink;

/// Everything a worker needs besides its reader.
#[derive(Clone)]
pub struct WorkerContext {
    pub node_name: String,
    pub codec: Arc<dyn PacketCodec>,
    pub sink: Arc<dyn PacketSink>,
    pub poll_timeout: Duration,
    /// Pause after a failed poll before polling again.
    pub retry_interval: Duration,
}

/// Outcome counts for one processed poll batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    pub delivered: usize,
    pub self_originated: usize,
    pub failed: usize,
    pub commits: usize,
}

enum RecordOutcome {
    Delivered,
    SelfOriginated,
}

/// One consumer thread bound to one log reader.
pub struct ConsumerWorker {
    index: usize,
    finished: Arc<AtomicBool>,
    waker: Arc<dyn Waker>,
    handle: Option<JoinHandle<()>>,
}

impl ConsumerWorker {
    pub fn spawn<R: LogReader + 'static>(
        index: usize,
        reader: R,
        context: WorkerContext,
    ) -> io::Result<Self> {
        let finished = Arc::new(AtomicBool::new(false));
        let waker = reader.waker();
        let flag = Arc::clone(&finished);
        let handle = thread::Builder::new()
            .name(format!("fanout-consumer-{index}"))
            .spawn(move || run(index, reader, &flag, &context))?;

        Ok(Self {
            index,
            finished,
            waker,
            handle: Some(handle),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Asks the loop to exit and interrupts a blocked poll.
    pub fn signal_stop(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.waker.wakeup();
            if let Some(handle) = &self.handle {
                handle.thread().unpark();
            }
        }
    }

    /// Waits for the loop to release its reader.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.index, "consumer worker panicked");
            }
        }
    }

    pub fn stop(&mut self) {
        self.signal_stop();
        self.join();
    }
}

impl Drop for ConsumerWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Closes the reader however the loop exits.
struct ReaderGuard<R: LogReader>(R);

impl<R: LogReader> Drop for ReaderGuard<R> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn run<R: LogReader>(index: usize, reader: R, finished: &AtomicBool, context: &WorkerContext) {
    let mut reader = ReaderGuard(reader);
    debug!(worker = index, "consumer worker started");

    while !finished.load(Ordering::SeqCst) {
        match reader.0.poll(context.poll_timeout) {
            Ok(batch) => {
                process_batch(&mut reader.0, &batch, context);
            }
            Err(LogError::Wakeup) => {
                if !finished.load(Ordering::SeqCst) {
                    warn!(worker = index, "consumer poll interrupted unexpectedly");
                }
            }
            Err(LogError::Closed) => {
                error!(worker = index, "log reader closed underneath consumer worker");
                break;
            }
            Err(err) => {
                error!(worker = index, error = %err, "consumer poll failed");
                back_off(finished, context.retry_interval);
            }
        }
    }

    info!(worker = index, "consumer worker stopped");
}

/// Parks until `interval` elapses or the worker is told to stop.
fn back_off(finished: &AtomicBool, interval: Duration) {
    let deadline = Instant::now() + interval;
    while !finished.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Processes every partition of `batch` in arrival order, committing each
/// partition at its last attempted offset + 1.
pub fn process_batch<R: LogReader + ?Sized>(
    reader: &mut R,
    batch: &PollBatch,
    context: &WorkerContext,
) -> BatchStats {
    let mut stats = BatchStats::default();

    for (partition, records) in batch.partitions() {
        for record in records {
            match process_record(record, context) {
                Ok(RecordOutcome::Delivered) => stats.delivered += 1,
                Ok(RecordOutcome::SelfOriginated) => stats.self_originated += 1,
                Err(err) => {
                    stats.failed += 1;
                    error!(
                        partition = %partition,
                        offset = record.offset,
                        error = %err,
                        "dropping unreadable backbone record"
                    );
                }
            }
        }

        if let Some(last) = records.last() {
            match reader.commit(partition, last.offset + 1) {
                Ok(()) => stats.commits += 1,
                Err(err) => warn!(partition = %partition, error = %err, "backbone commit failed"),
            }
        }
    }
    stats
}

fn process_record(record: &LogRecord, context: &WorkerContext) -> Result<RecordOutcome, CodecError> {
    let envelope = context.codec.decode(&record.value)?;
    if envelope.originated_at(&context.node_name) {
        return Ok(RecordOutcome::SelfOriginated);
    }
    context.sink.deliver_local(envelope.packet);
    Ok(RecordOutcome::Delivered)
}
