#![deny(missing_docs)]
//! Capability-token delegation and checkpoint signing for the tlog service.
//!
//! The delegation model (component 4.K) and the Ed25519 checkpoint signer are
//! kept separate: a token's signature proves who delegated what, the
//! checkpoint signature proves what the service itself attests to.

/// Ed25519 checkpoint signing.
pub mod checkpoint;
/// Capability-token structures.
pub mod token;
/// Capability-token validation (component 4.K).
pub mod validator;

pub use checkpoint::CheckpointSigner;
pub use token::{Ability, CapabilityToken, TokenClaims};
pub use validator::TokenValidator;
