//! The entry-queue/batcher (component 4.G).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use tlog_crypto::CapabilityToken;
use tlog_types::error::PipelineError;
use tlog_types::DEFAULT_BATCH_MAX_SIZE;

/// The per-entry result the append pipeline assigns once a batch integrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// This entry's absolute leaf index.
    pub index: u64,
    /// The log's tree size immediately after this batch integrated.
    pub tree_size: u64,
}

/// The channel a caller receives its entry's outcome on.
pub type AppendReceiver = oneshot::Receiver<Result<AppendOutcome, Arc<PipelineError>>>;

/// One entry waiting in the batch.
///
/// Holds the caller's data plus the sender half of its result channel. The
/// sender is private: only [`QueuedEntry::respond`] can consume it, so a
/// flush function cannot forget to notify a caller without dropping the
/// entry outright (which itself resolves the receiver with a `RecvError`).
pub struct QueuedEntry {
    /// The raw entry bytes as submitted by the caller.
    pub entry: Vec<u8>,
    /// The capability token carried by the request, forwarded to 4.F/4.I.
    pub token: Option<CapabilityToken>,
    result: oneshot::Sender<Result<AppendOutcome, Arc<PipelineError>>>,
}

impl QueuedEntry {
    /// Builds a queued entry and the receiver its submitter awaits on.
    pub fn new(entry: Vec<u8>, token: Option<CapabilityToken>) -> (Self, AppendReceiver) {
        let (result, rx) = oneshot::channel();
        (Self { entry, token, result }, rx)
    }

    /// Delivers this entry's outcome to its caller.
    pub fn respond(self, result: Result<AppendOutcome, Arc<PipelineError>>) {
        let _ = self.result.send(result);
    }
}

/// A flush result: `Ok(())` if the function already responded to every
/// entry it was given; `Err((error, entries))` hands the entries back so
/// the batcher can notify every caller still waiting.
pub type FlushResult = Result<(), (PipelineError, Vec<QueuedEntry>)>;

/// The function invoked with a detached batch. On success, it must have
/// called [`QueuedEntry::respond`] on every entry (spec §4.G: "flushFn
/// writes per-item results inside itself"). On failure, it returns the
/// still-unanswered entries so the batcher can broadcast the error.
pub type FlushFn = Arc<dyn Fn(Vec<QueuedEntry>) -> BoxFuture<'static, FlushResult> + Send + Sync>;

/// Configuration for one log's batcher.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Hard flush threshold; reaching this many queued entries triggers an
    /// immediate detach-and-dispatch (spec §4.G, §5: default 256).
    pub max_size: usize,
    /// Accepted for API compatibility but never acted on: a time-based
    /// flush would fire with no caller-supplied capability token to carry,
    /// so timer-triggered batching stays permanently disabled (spec §9
    /// Open Question, decided in DESIGN.md).
    pub max_age: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_BATCH_MAX_SIZE,
            max_age: Duration::ZERO,
        }
    }
}

/// Collects entries for one log and dispatches size-triggered flushes.
///
/// `add` is lock-free from the caller's perspective beyond a brief mutex
/// hold to push and check the threshold (spec §5: "lock-free on `Add`;
/// flushes run on independent tasks").
pub struct EntryBatcher {
    config: BatchConfig,
    pending: Mutex<Vec<QueuedEntry>>,
    flush: FlushFn,
}

impl EntryBatcher {
    /// Builds a batcher that dispatches full batches to `flush`.
    pub fn new(config: BatchConfig, flush: FlushFn) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Mutex::new(Vec::new()),
            flush,
        })
    }

    /// Enqueues one entry. If the queue has now reached `max_size`, detaches
    /// the whole slice atomically, resets the queue, and dispatches it to
    /// `flush` on a fresh task.
    pub fn add(self: &Arc<Self>, entry: QueuedEntry) {
        let batch = {
            let mut pending = self.pending.lock().expect("batcher queue poisoned");
            pending.push(entry);
            if pending.len() >= self.config.max_size {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.dispatch(batch);
        }
    }

    /// The number of entries currently queued, awaiting the next flush.
    pub fn depth(&self) -> usize {
        self.pending.lock().expect("batcher queue poisoned").len()
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<QueuedEntry>) {
        let flush = self.flush.clone();
        tokio::spawn(async move {
            let size = batch.len();
            if let Err((error, unanswered)) = (flush)(batch).await {
                tracing::warn!(error = %error, entries = size, "batch flush failed");
                let error = Arc::new(error);
                for entry in unanswered {
                    entry.respond(Err(error.clone()));
                }
            }
        });
    }
}
