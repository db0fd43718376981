//! The capability-token model (spec §4.K, §9 "polymorphism over capability sets").
//!
//! A token is an opaque, signed grant from an issuer to an audience, naming a
//! space and a set of abilities, optionally chained to a proof (an ancestor
//! token delegating the same or a superset of authority). Tokens are
//! request-scoped: nothing here is ever cached across calls.

use dcrypt::api::Signature as _;
use dcrypt::sign::eddsa;
use serde::{Deserialize, Serialize};
use tlog_types::ContentId;

/// One ability a capability token can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ability {
    /// Write a blob into the tenant's content-addressed space.
    SpaceBlobAdd,
    /// Register a content-linkage (index) entry in IPNI or equivalent.
    SpaceIndexAdd,
    /// Perform the allocate/upload/conclude handshake against the backend.
    UploadAdd,
    /// Remove a blob from the tenant's space (required for `tlog/gc`).
    SpaceBlobRemove,
}

impl Ability {
    /// The ability string as it appears on the wire, matching spec §4.K.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpaceBlobAdd => "space/blob/add",
            Self::SpaceIndexAdd => "space/index/add",
            Self::UploadAdd => "upload/add",
            Self::SpaceBlobRemove => "space/blob/remove",
        }
    }

    /// The ability set required for ordinary append/create operations
    /// (spec §4.K: `{space/blob/add, space/index/add, upload/add}`).
    pub const WRITE_SET: [Ability; 3] = [Self::SpaceBlobAdd, Self::SpaceIndexAdd, Self::UploadAdd];
}

/// The unsigned body of a capability token: the claims the issuer attests to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// DID-like identifier of the principal that minted this token.
    pub issuer: String,
    /// The service identity this token is addressed to.
    pub audience: String,
    /// The tenant-space identifier this token's abilities apply to.
    pub space_id: String,
    /// Abilities this token grants.
    pub abilities: Vec<Ability>,
    /// Unix-epoch milliseconds after which this token is no longer valid, if bounded.
    pub expires_at_ms: Option<i64>,
}

/// A signed capability token, optionally chained to an ancestor via `proof`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// The claims this token attests to.
    pub claims: TokenClaims,
    /// Raw Ed25519 signature bytes over the canonical encoding of `claims`.
    pub signature: Vec<u8>,
    /// Raw Ed25519 public key bytes of `claims.issuer`, used to verify `signature`.
    pub issuer_public_key: Vec<u8>,
    /// An ancestor token whose authority this token was delegated from.
    /// `None` means this token is a root grant, signed by the space owner.
    pub proof: Option<Box<CapabilityToken>>,
}

/// Errors from token (de)serialization and signature verification.
#[derive(Debug, thiserror::Error)]
pub enum TokenCodecError {
    /// The token bytes were not valid encoded JSON.
    #[error("malformed token encoding: {0}")]
    Malformed(String),
    /// The issuer's public key bytes did not decode to a valid Ed25519 key.
    #[error("invalid issuer key: {0}")]
    InvalidIssuerKey(String),
    /// The signature bytes did not decode, or did not verify over the claims.
    #[error("signature verification failed")]
    BadSignature,
}

impl CapabilityToken {
    /// The canonical bytes a signature is computed over: the JSON encoding of `claims`.
    pub fn signing_bytes(claims: &TokenClaims) -> Vec<u8> {
        serde_json::to_vec(claims).unwrap_or_default()
    }

    /// Parses a token from its wire encoding (spec §4.K `ParseToken`).
    pub fn parse(bytes: &[u8]) -> Result<Self, TokenCodecError> {
        serde_json::from_slice(bytes).map_err(|e| TokenCodecError::Malformed(e.to_string()))
    }

    /// Serializes this token to its wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The content-id identifying this token blob, used as its revocation key.
    pub fn content_id(&self) -> ContentId {
        ContentId::of(&self.to_bytes())
    }

    /// Verifies this token's own signature (not its proof chain or revocation status).
    pub fn verify_signature(&self) -> Result<(), TokenCodecError> {
        let public_key = eddsa::Ed25519PublicKey::from_bytes(&self.issuer_public_key).map_err(|e| {
            TokenCodecError::InvalidIssuerKey(format!("{e:?}"))
        })?;
        let signature = eddsa::Ed25519Signature::from_bytes(&self.signature)
            .map_err(|_| TokenCodecError::BadSignature)?;
        eddsa::Ed25519::verify(&Self::signing_bytes(&self.claims), &signature, &public_key).map_err(|_| {
            tracing::warn!(issuer = %self.claims.issuer, "capability token signature verification failed");
            TokenCodecError::BadSignature
        })
    }

    /// This token and each ancestor in its proof chain, outermost (this
    /// token) first.
    pub fn chain(&self) -> impl Iterator<Item = &CapabilityToken> {
        std::iter::successors(Some(self), |t| t.proof.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_ability() -> impl Strategy<Value = Ability> {
        prop_oneof![
            Just(Ability::SpaceBlobAdd),
            Just(Ability::SpaceIndexAdd),
            Just(Ability::UploadAdd),
            Just(Ability::SpaceBlobRemove),
        ]
    }

    fn any_claims() -> impl Strategy<Value = TokenClaims> {
        (
            "[a-z]{4,12}",
            "[a-z]{4,12}",
            "[a-z]{4,12}",
            prop::collection::vec(any_ability(), 0..4),
            prop::option::of(0i64..i64::MAX),
        )
            .prop_map(|(issuer, audience, space_id, abilities, expires_at_ms)| TokenClaims {
                issuer,
                audience,
                space_id,
                abilities,
                expires_at_ms,
            })
    }

    proptest! {
        // `parse` is the inverse of `to_bytes` for any claims/signature
        // shape, independent of whether the signature itself verifies.
        #[test]
        fn token_encode_decode_round_trips(
            claims in any_claims(),
            signature in prop::collection::vec(any::<u8>(), 0..80),
            issuer_public_key in prop::collection::vec(any::<u8>(), 0..40),
        ) {
            let token = CapabilityToken {
                claims,
                signature,
                issuer_public_key,
                proof: None,
            };
            let bytes = token.to_bytes();
            let decoded = CapabilityToken::parse(&bytes).expect("parses");
            prop_assert_eq!(decoded.claims.issuer, token.claims.issuer);
            prop_assert_eq!(decoded.claims.audience, token.claims.audience);
            prop_assert_eq!(decoded.claims.space_id, token.claims.space_id);
            prop_assert_eq!(decoded.claims.abilities, token.claims.abilities);
            prop_assert_eq!(decoded.claims.expires_at_ms, token.claims.expires_at_ms);
            prop_assert_eq!(decoded.signature, token.signature);
            prop_assert_eq!(decoded.issuer_public_key, token.issuer_public_key);
            prop_assert!(decoded.proof.is_none());
        }
    }
}
