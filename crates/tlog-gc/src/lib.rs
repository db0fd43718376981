#![deny(missing_docs)]

//! # tlog-gc
//!
//! The garbage collector (component 4.J): sweeps `.p/<W>` partial tiles
//! and entry bundles left behind once their position has sealed, capped
//! per run and single-flight per log. Delegation-gating (a direct
//! capability from the space owner) is enforced by the caller before
//! invoking [`GarbageCollector::run`].

mod collector;

pub use collector::{GarbageCollector, GcReport, DEFAULT_MAX_BUNDLES};
