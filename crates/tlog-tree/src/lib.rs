#![deny(missing_docs)]

//! # tlog-tree
//!
//! The Merkle tree layer: RFC6962 hashing over the tlog-tiles stored-node
//! layout (4.E's tile/bundle resource store, 4.F's integrator).

mod bucket;
mod bundle;
mod hash;
mod integrator;
mod resource_store;
mod tile;

pub use bucket::{buckets, Bucket};
pub use bundle::{decode_bundle, encode_bundle};
pub use hash::{empty_root, leaf_hash, node_hash, root_from_peaks, stored_node_count, Hash};
pub use integrator::{current_root, extend, IntegrationResult};
pub use resource_store::ResourceStore;
pub use tile::{decode_tile, encode_tile, WIDTH};
