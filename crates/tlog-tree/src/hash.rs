//! RFC6962 leaf/node hashing and the stored-node indexing scheme that
//! underlies tile-tiles (spec §4.F).
//!
//! A tile at level `L`, index `i` stores the hash of the complete subtree
//! covering leaves `[i*2^L, (i+1)*2^L)`. That node is *defined* once the
//! tree has grown past the end of that range, i.e. iff `i < size >> L`
//! (spec invariant: "leaf at `2k` is the left child, `2k+1` the right").

use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest: a leaf hash, an inner node hash, or the root.
pub type Hash = [u8; 32];

/// `H(0x00 || entry)` (RFC6962 leaf hash rule).
pub fn leaf_hash(entry: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(entry);
    hasher.finalize().into()
}

/// `H(0x01 || left || right)` (RFC6962 inner node hash rule).
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// `H("")`, the empty tree's root.
pub fn empty_root() -> Hash {
    Sha256::digest([]).into()
}

/// The number of level-`level` nodes defined for a tree of `size` leaves:
/// the count of complete, aligned `2^level`-leaf subtrees.
pub fn stored_node_count(level: u32, size: u64) -> u64 {
    size >> level
}

/// Combines the RFC6962 "peak" hashes for a tree of `size` leaves into its
/// root, given a lookup for one peak hash at a time. Peaks are the
/// rightmost defined node at each level whose bit is set in `size`'s binary
/// representation, folded from the lowest set level (smallest, rightmost
/// subtree) up to the highest.
pub fn root_from_peaks<E>(
    size: u64,
    mut peak_hash: impl FnMut(u32, u64) -> Result<Hash, E>,
) -> Result<Hash, E> {
    if size == 0 {
        return Ok(empty_root());
    }
    let mut acc: Option<Hash> = None;
    for level in 0..64u32 {
        if (size >> level) & 1 == 0 {
            continue;
        }
        let index = stored_node_count(level, size) - 1;
        let peak = peak_hash(level, index)?;
        acc = Some(match acc {
            None => peak,
            Some(lower) => node_hash(&peak, &lower),
        });
        if size >> (level + 1) == 0 {
            break;
        }
    }
    Ok(acc.expect("size > 0 implies at least one set bit"))
}
