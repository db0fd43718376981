//! Capability-token validation (spec §4.K).

use std::collections::HashSet;

use tlog_types::error::CapabilityError;
use tlog_types::ContentId;

use crate::token::{Ability, CapabilityToken};

/// Validates capability tokens against this service's identity.
///
/// Mirrors spec §4.K's operation list exactly: each method here is one of
/// its named checks, called in sequence by the append pipeline and the
/// RPC handlers rather than folded into one opaque `validate`.
pub struct TokenValidator {
    service_audience: String,
}

impl TokenValidator {
    /// Builds a validator bound to this service's own identity string.
    pub fn new(service_audience: impl Into<String>) -> Self {
        Self {
            service_audience: service_audience.into(),
        }
    }

    /// `ParseToken(bytes) → token | ParseError`.
    pub fn parse_token(&self, bytes: &[u8]) -> Result<CapabilityToken, CapabilityError> {
        CapabilityToken::parse(bytes).map_err(|e| CapabilityError::InvalidToken(e.to_string()))
    }

    /// `ExtractSpaceIdentifier(token) → identifier`, enforcing that every
    /// token in the chain names the same space.
    pub fn extract_space_identifier(&self, token: &CapabilityToken) -> Result<String, CapabilityError> {
        let mut ids = token.chain().map(|t| t.claims.space_id.as_str());
        let first = ids.next().ok_or_else(|| {
            CapabilityError::InvalidToken("token chain is empty".into())
        })?;
        if ids.all(|id| id == first) {
            Ok(first.to_string())
        } else {
            Err(CapabilityError::InvalidSpaceDid)
        }
    }

    /// `ValidateToken(token, expectedAudience, spaceId)`: checks the
    /// signature, audience, required ability set, and non-expiry.
    pub fn validate_token(
        &self,
        token: &CapabilityToken,
        space_id: &str,
        required: &[Ability],
        now_ms: i64,
    ) -> Result<(), CapabilityError> {
        token
            .verify_signature()
            .map_err(|e| CapabilityError::InvalidToken(e.to_string()))?;
        if token.claims.audience != self.service_audience {
            return Err(CapabilityError::InvalidAudience);
        }
        if token.claims.space_id != space_id {
            return Err(CapabilityError::InvalidSpaceDid);
        }
        for ability in required {
            if !token.claims.abilities.contains(ability) {
                return Err(CapabilityError::MissingAbility(ability.as_str()));
            }
        }
        if let Some(expires_at_ms) = token.claims.expires_at_ms {
            if now_ms >= expires_at_ms {
                return Err(CapabilityError::Expired);
            }
        }
        Ok(())
    }

    /// `ValidateInvocationAuthority(invocationIssuer, token)`: the RPC
    /// caller's signer must equal the token's issuer.
    pub fn validate_invocation_authority(
        &self,
        invocation_issuer: &str,
        token: &CapabilityToken,
    ) -> Result<(), CapabilityError> {
        if invocation_issuer == token.claims.issuer {
            Ok(())
        } else {
            Err(CapabilityError::InvocationNotAuthorized)
        }
    }

    /// `ValidateProofChain(token, spaceId)`: walks proofs to a root whose
    /// issuer equals `spaceId` (the space owner delegates to itself as the
    /// chain's root).
    pub fn validate_proof_chain(&self, token: &CapabilityToken, space_id: &str) -> Result<(), CapabilityError> {
        let mut chain = token.chain().peekable();
        loop {
            let current = chain.next().ok_or_else(|| {
                CapabilityError::InvalidToken("empty proof chain".into())
            })?;
            current
                .verify_signature()
                .map_err(|e| CapabilityError::InvalidToken(e.to_string()))?;
            if chain.peek().is_none() {
                return if current.claims.issuer == space_id {
                    Ok(())
                } else {
                    Err(CapabilityError::DelegationNoAuthority)
                };
            }
            let next = chain.peek().expect("peeked Some above");
            if current.claims.issuer != next.claims.audience && current.claims.issuer != next.claims.issuer {
                return Err(CapabilityError::DelegationNoAuthority);
            }
        }
    }

    /// `ValidateRevocationAuthority(revoker, tokenToRevoke)`: only the
    /// token's issuer, or an upstream issuer in its proof chain, may revoke it.
    pub fn validate_revocation_authority(
        &self,
        revoker: &str,
        token_to_revoke: &CapabilityToken,
    ) -> Result<(), CapabilityError> {
        if token_to_revoke.chain().any(|t| t.claims.issuer == revoker) {
            Ok(())
        } else {
            Err(CapabilityError::RevokeNotAuthorized)
        }
    }

    /// Revocation check (spec §4.K, §8): none of `token`'s content-id or its
    /// proof chain's content-ids may appear in `revoked`.
    pub fn check_not_revoked(
        &self,
        token: &CapabilityToken,
        revoked: &HashSet<ContentId>,
    ) -> Result<(), CapabilityError> {
        if token.chain().any(|t| revoked.contains(&t.content_id())) {
            Err(CapabilityError::DelegationRevoked)
        } else {
            Ok(())
        }
    }

    /// Requires that `token`'s *own* claims (not its proof chain) carry a
    /// direct grant from `space_id`, per spec §9: `tlog/gc` must not accept
    /// a sub-delegated grant.
    pub fn require_direct_grant(&self, token: &CapabilityToken, space_id: &str) -> Result<(), CapabilityError> {
        if token.proof.is_none() && token.claims.issuer == space_id {
            Ok(())
        } else {
            Err(CapabilityError::GcDelegationNotDirect)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::SigningError;
    use crate::token::TokenClaims;
    use dcrypt::api::Signature as _;
    use dcrypt::sign::eddsa;
    use rand::rngs::OsRng;

    fn sign_claims(
        claims: TokenClaims,
        proof: Option<Box<CapabilityToken>>,
    ) -> Result<(CapabilityToken, eddsa::Ed25519SecretKey), SigningError> {
        let mut rng = OsRng;
        let (public_key, secret_key) =
            eddsa::Ed25519::keypair(&mut rng).map_err(|e| SigningError::Backend(format!("{e:?}")))?;
        let signature = eddsa::Ed25519::sign(&CapabilityToken::signing_bytes(&claims), &secret_key)
            .map_err(|e| SigningError::Backend(format!("{e:?}")))?;
        Ok((
            CapabilityToken {
                claims,
                signature: signature.to_bytes(),
                issuer_public_key: public_key.to_bytes(),
                proof,
            },
            secret_key,
        ))
    }

    #[test]
    fn validates_a_well_formed_root_token() {
        let claims = TokenClaims {
            issuer: "did:key:zA".into(),
            audience: "did:web:tlog.example".into(),
            space_id: "did:key:zA".into(),
            abilities: Ability::WRITE_SET.to_vec(),
            expires_at_ms: None,
        };
        let (token, _sk) = sign_claims(claims, None).expect("sign");

        let validator = TokenValidator::new("did:web:tlog.example");
        assert!(validator
            .validate_token(&token, "did:key:zA", &Ability::WRITE_SET, 0)
            .is_ok());
        assert!(validator.validate_proof_chain(&token, "did:key:zA").is_ok());
        assert!(validator
            .validate_invocation_authority("did:key:zA", &token)
            .is_ok());
    }

    #[test]
    fn rejects_wrong_audience() {
        let claims = TokenClaims {
            issuer: "did:key:zA".into(),
            audience: "did:web:someone-else".into(),
            space_id: "did:key:zA".into(),
            abilities: Ability::WRITE_SET.to_vec(),
            expires_at_ms: None,
        };
        let (token, _sk) = sign_claims(claims, None).expect("sign");

        let validator = TokenValidator::new("did:web:tlog.example");
        assert_eq!(
            validator.validate_token(&token, "did:key:zA", &Ability::WRITE_SET, 0),
            Err(CapabilityError::InvalidAudience)
        );
    }

    #[test]
    fn detects_revoked_token_in_chain() {
        let claims = TokenClaims {
            issuer: "did:key:zA".into(),
            audience: "did:web:tlog.example".into(),
            space_id: "did:key:zA".into(),
            abilities: Ability::WRITE_SET.to_vec(),
            expires_at_ms: None,
        };
        let (token, _sk) = sign_claims(claims, None).expect("sign");
        let mut revoked = HashSet::new();
        revoked.insert(token.content_id());

        let validator = TokenValidator::new("did:web:tlog.example");
        assert_eq!(
            validator.check_not_revoked(&token, &revoked),
            Err(CapabilityError::DelegationRevoked)
        );
    }

    #[test]
    fn gc_rejects_sub_delegated_grant() {
        let root_claims = TokenClaims {
            issuer: "did:key:zA".into(),
            audience: "did:web:tlog.example".into(),
            space_id: "did:key:zA".into(),
            abilities: vec![Ability::SpaceBlobRemove],
            expires_at_ms: None,
        };
        let (root, _root_sk) = sign_claims(root_claims, None).expect("sign");

        let delegate_claims = TokenClaims {
            issuer: "did:key:zDelegate".into(),
            audience: "did:web:tlog.example".into(),
            space_id: "did:key:zA".into(),
            abilities: vec![Ability::SpaceBlobRemove],
            expires_at_ms: None,
        };
        let (delegated, _delegate_sk) =
            sign_claims(delegate_claims, Some(Box::new(root))).expect("sign");

        let validator = TokenValidator::new("did:web:tlog.example");
        assert_eq!(
            validator.require_direct_grant(&delegated, "did:key:zA"),
            Err(CapabilityError::GcDelegationNotDirect)
        );
    }
}
