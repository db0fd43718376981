#![deny(missing_docs)]

//! # tlog-persist
//!
//! The index-CAR persister (component 4.I): packages the path→content-id
//! mirror as a directory DAG and uploads it through the blob backend,
//! rate-limited and single-flight per log.

mod dag;
mod persister;

pub use dag::{package_index, DirEntry, DirNode, PackagedIndex};
pub use persister::Persister;
