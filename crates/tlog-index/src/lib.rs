#![deny(missing_docs)]
//! The content-addressed path index (component 4.B) and the object store
//! layer built over it (component 4.D): together these bridge path-addressed
//! tile storage to a content-addressed blob backend.

mod mirror;
mod object_store;

pub use mirror::CidIndex;
pub use object_store::ObjectStore;
