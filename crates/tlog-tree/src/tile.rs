//! Tile encoding: a tile is up to 256 concatenated 32-byte node hashes
//! (spec §4.E).

use tlog_types::error::IntegrationError;

use crate::hash::Hash;

/// The maximum number of hashes (or entries) a full tile/bundle holds.
pub const WIDTH: usize = 256;

/// Serializes a tile's hashes to bytes.
pub fn encode_tile(hashes: &[Hash]) -> Vec<u8> {
    hashes.iter().flatten().copied().collect()
}

/// Parses a tile's bytes back into its hashes.
pub fn decode_tile(bytes: &[u8]) -> Result<Vec<Hash>, IntegrationError> {
    if bytes.len() % 32 != 0 {
        return Err(IntegrationError::Store(format!(
            "tile byte length {} is not a multiple of 32",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|c| c.try_into().expect("chunk is exactly 32 bytes"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_handful_of_hashes() {
        let hashes = vec![[1u8; 32], [2u8; 32], [3u8; 32]];
        let bytes = encode_tile(&hashes);
        assert_eq!(bytes.len(), 96);
        let back = decode_tile(&bytes).expect("decode");
        assert_eq!(back, hashes);
    }

    #[test]
    fn rejects_misaligned_bytes() {
        assert!(decode_tile(&[0u8; 31]).is_err());
    }
}
