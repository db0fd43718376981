//! Entry bundle encoding: a sequence of up to 256 length-prefixed raw
//! entries, big-endian 2-byte length followed by bytes (spec §4.F).

use tlog_types::error::IntegrationError;

/// Serializes a list of entries into a bundle's bytes.
pub fn encode_bundle(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let len = entry.len() as u16;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(entry);
    }
    out
}

/// Parses a bundle's bytes back into its list of entries.
pub fn decode_bundle(bytes: &[u8]) -> Result<Vec<Vec<u8>>, IntegrationError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if i + 2 > bytes.len() {
            return Err(IntegrationError::Store("truncated entry bundle length prefix".into()));
        }
        let len = u16::from_be_bytes([bytes[i], bytes[i + 1]]) as usize;
        i += 2;
        if i + len > bytes.len() {
            return Err(IntegrationError::Store("truncated entry bundle body".into()));
        }
        out.push(bytes[i..i + len].to_vec());
        i += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_a_list_of_entries() {
        let entries = vec![b"first".to_vec(), b"".to_vec(), b"third entry".to_vec()];
        let bytes = encode_bundle(&entries);
        let back = decode_bundle(&bytes).expect("decode");
        assert_eq!(back, entries);
    }

    #[test]
    fn rejects_truncated_bytes() {
        assert!(decode_bundle(&[0x00, 0x05, b'h', b'i']).is_err());
    }

    proptest! {
        // `decode_bundle` is the exact inverse of `encode_bundle` for any
        // list of entries within the u16 length-prefix's range.
        #[test]
        fn decode_inverts_encode(
            entries in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32)
        ) {
            let bytes = encode_bundle(&entries);
            let decoded = decode_bundle(&bytes).expect("decode");
            prop_assert_eq!(decoded, entries);
        }
    }
}
