#![deny(missing_docs)]

//! # tlog-pipeline
//!
//! The append pipeline (component 4.H): the per-log flush contract that an
//! `EntryBatcher` (4.G) dispatches detached batches to.

mod pipeline;

pub use pipeline::AppendPipeline;
