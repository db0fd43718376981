//! Content-identifiers for blobs in the tenant's content-addressed space.
//!
//! The backend speaks CIDv1 strings with the `raw` codec over SHA-256
//! (spec §6, "Backend blob client"). We mint and parse that exact encoding
//! here rather than pull in a CID crate, since the shape needed — one fixed
//! codec, one fixed hash function — is a handful of constant bytes plus a
//! base32 alphabet.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::TlogError;

/// Multicodec code for the `raw` binary codec.
const CODEC_RAW: u8 = 0x55;
/// Multihash function code for SHA-256.
const MH_SHA2_256: u8 = 0x12;
/// SHA-256 digest length in bytes.
const SHA2_256_LEN: u8 = 0x20;
/// CID version byte (CIDv1).
const CID_V1: u8 = 0x01;
/// Multibase prefix for lowercase, unpadded base32 (the `b` prefix).
const MULTIBASE_B32_LOWER: char = 'b';

/// A self-verifying content identifier: CIDv1, `raw` codec, SHA-256 digest.
///
/// `Display`/`FromStr` round-trip through the canonical multibase string
/// (e.g. `bafkreigh2akiscaildc...`), which is what the backend and the
/// path→content-id index both store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId(#[serde(with = "digest_hex")] pub [u8; 32]);

impl ContentId {
    /// Computes the content-id of a blob's bytes (CIDv1, raw, SHA-256).
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// The raw 32-byte SHA-256 digest (the multihash's "digest" field).
    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encodes this content-id as its canonical CIDv1 string.
    pub fn to_cid_string(&self) -> String {
        let mut body = Vec::with_capacity(4 + 32);
        body.push(CID_V1);
        body.push(CODEC_RAW);
        body.push(MH_SHA2_256);
        body.push(SHA2_256_LEN);
        body.extend_from_slice(&self.0);
        let encoded = base32::encode(base32::Alphabet::Rfc4648Lower { padding: false }, &body);
        format!("{MULTIBASE_B32_LOWER}{encoded}")
    }

    /// Parses a CIDv1 `raw`/SHA-256 string produced by [`ContentId::to_cid_string`].
    pub fn parse(s: &str) -> Result<Self, TlogError> {
        let rest = s
            .strip_prefix(MULTIBASE_B32_LOWER)
            .ok_or_else(|| TlogError::InvalidContentId(format!("unsupported multibase in {s}")))?;
        let body = base32::decode(base32::Alphabet::Rfc4648Lower { padding: false }, rest)
            .ok_or_else(|| TlogError::InvalidContentId(format!("invalid base32 in {s}")))?;
        if body.len() != 36 {
            return Err(TlogError::InvalidContentId(format!(
                "unexpected CID body length {} in {s}",
                body.len()
            )));
        }
        if body[0] != CID_V1 || body[1] != CODEC_RAW || body[2] != MH_SHA2_256 || body[3] != SHA2_256_LEN {
            return Err(TlogError::InvalidContentId(format!(
                "unsupported CID header in {s}"
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&body[4..]);
        Ok(Self(out))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_cid_string())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_cid_string())
    }
}

impl std::str::FromStr for ContentId {
    type Err = TlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

mod digest_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hex digest"))
    }
}
