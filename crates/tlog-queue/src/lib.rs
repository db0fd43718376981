#![deny(missing_docs)]

//! # tlog-queue
//!
//! The entry-queue/batcher (component 4.G): a lock-free-on-`Add` collector
//! that detaches a size-triggered batch and dispatches it to a flush
//! function on a fresh task.

mod batcher;

pub use batcher::{
    AppendOutcome, AppendReceiver, BatchConfig, EntryBatcher, FlushFn, FlushResult, QueuedEntry,
};
