//! Ed25519 checkpoint signing, implemented over `dcrypt` (spec §3, invariant 3).

use dcrypt::api::Signature as _;
use dcrypt::sign::eddsa;
use rand::rngs::OsRng;
use rand::RngCore;
use tlog_types::entities::Checkpoint;
use zeroize::Zeroizing;

/// Errors from checkpoint key handling and signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The key bytes did not decode to a valid Ed25519 key.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    /// The underlying signature operation failed.
    #[error("signing failed: {0}")]
    Backend(String),
}

/// A service identity's Ed25519 keypair, used to sign checkpoints.
pub struct CheckpointSigner {
    signer_id: String,
    public_key: eddsa::Ed25519PublicKey,
    secret_key: eddsa::Ed25519SecretKey,
}

impl CheckpointSigner {
    /// Generates a fresh signing key, identified by `signer_id` in emitted
    /// signature lines (spec's `origin signer-id base64(signature)` shape).
    ///
    /// The seed backing the key is held in a `Zeroizing` buffer and wiped as
    /// soon as the key is derived from it, rather than left to linger in an
    /// RNG-owned stack frame.
    pub fn generate(signer_id: impl Into<String>) -> Result<Self, SigningError> {
        let mut rng = OsRng;
        let mut seed = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut *seed);
        Self::from_seed(signer_id, &seed)
    }

    /// Restores a signer from a raw 32-byte seed, as loaded from the
    /// environment-configured identity key (spec §6, "Environment").
    ///
    /// `seed` is copied into a `Zeroizing` buffer for the duration of key
    /// derivation and wiped on return; the caller's own copy is unaffected
    /// and remains the caller's responsibility to zeroize.
    pub fn from_seed(signer_id: impl Into<String>, seed: &[u8]) -> Result<Self, SigningError> {
        let seed = Zeroizing::new(seed.to_vec());
        let secret_key = eddsa::Ed25519SecretKey::from_seed(&seed)
            .map_err(|e| SigningError::InvalidKey(format!("{e:?}")))?;
        let public_key = secret_key
            .public_key()
            .map_err(|e| SigningError::InvalidKey(format!("{e:?}")))?;
        let signer_id = signer_id.into();
        tracing::debug!(signer_id = %signer_id, "checkpoint signer initialized");
        Ok(Self {
            signer_id,
            public_key,
            secret_key,
        })
    }

    /// This signer's stable identifier, as it appears in signature lines.
    pub fn signer_id(&self) -> &str {
        &self.signer_id
    }

    /// Signs `(origin, size, root)` and returns the checkpoint with this
    /// signer's line appended.
    pub fn sign(&self, origin: &str, size: u64, root: &[u8; 32]) -> Result<Checkpoint, SigningError> {
        let body = Checkpoint::signed_body(origin, size, root);
        let signature = eddsa::Ed25519::sign(body.as_bytes(), &self.secret_key)
            .map_err(|e| SigningError::Backend(format!("{e:?}")))?;
        let line = format!(
            "{origin} {} {}",
            self.signer_id,
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.to_bytes())
        );
        Ok(Checkpoint {
            origin: origin.to_string(),
            size,
            root: *root,
            signatures: vec![line],
        })
    }

    /// Verifies that `checkpoint` carries a signature line from this signer
    /// valid over its own `(origin, size, root)`.
    pub fn verify(&self, checkpoint: &Checkpoint) -> bool {
        let body = Checkpoint::signed_body(&checkpoint.origin, checkpoint.size, &checkpoint.root);
        let prefix = format!("{} {} ", checkpoint.origin, self.signer_id);
        checkpoint.signatures.iter().any(|line| {
            let Some(sig_b64) = line.strip_prefix(&prefix) else {
                return false;
            };
            let Ok(sig_bytes) =
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sig_b64)
            else {
                return false;
            };
            let Ok(signature) = eddsa::Ed25519Signature::from_bytes(&sig_bytes) else {
                return false;
            };
            eddsa::Ed25519::verify(body.as_bytes(), &signature, &self.public_key).is_ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_and_verifies_round_trip() {
        let signer = CheckpointSigner::generate("node-a").expect("generate");
        let root = [7u8; 32];
        let checkpoint = signer.sign("tlog://node-a/did:key:zA", 3, &root).expect("sign");
        assert!(signer.verify(&checkpoint));
    }

    #[test]
    fn rejects_tampered_root() {
        let signer = CheckpointSigner::generate("node-a").expect("generate");
        let mut checkpoint = signer
            .sign("tlog://node-a/did:key:zA", 3, &[7u8; 32])
            .expect("sign");
        checkpoint.root = [9u8; 32];
        assert!(!signer.verify(&checkpoint));
    }
}
