#![deny(missing_docs)]

//! # tlog-manager
//!
//! The per-space log manager (component 4.L): lazily restores a log's
//! driver on first access, upgrading it from a read-only gateway client to
//! a delegated-write client on the first authenticated append.

mod error;
mod instance;
mod manager;

pub use error::{validate_log_id, ManagerError};
pub use instance::LogInstance;
pub use manager::LogManager;
