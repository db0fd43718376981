#![deny(missing_docs)]
//! Backend blob client abstraction (component 4.C/4.C') and its two
//! concrete capability variants (spec §9, "Polymorphism over capability
//! sets"): a delegated client that can write, and a read-only gateway
//! client a log manager falls back to before any write has authenticated.

mod client;
mod delegated;
mod readonly;

pub use client::BlobClient;
pub use delegated::DelegatedBlobClient;
pub use readonly::ReadOnlyGatewayClient;
