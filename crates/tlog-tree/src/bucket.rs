//! The width-256 bucketing shared by tiles and entry bundles: splits a
//! newly-defined index range `[old_count, new_count)` into per-bucket
//! sub-ranges, crossing a bucket boundary mid-range writes the full
//! predecessor and starts a fresh buffer for the successor (spec §4.F).

/// One bucket touched by an extension: its index, the global range of item
/// positions it newly receives, and whether the bucket already held
/// entries before this extension that must be preloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// The bucket's index (`global_position / 256`).
    pub index: u64,
    /// The half-open range of global positions newly added to this bucket.
    pub new_range: std::ops::Range<u64>,
    /// Whether this bucket held `old_count % 256` entries before this
    /// extension that must be loaded and prepended.
    pub needs_preload: bool,
}

/// Splits `[old_count, new_count)` into width-256-aligned buckets.
pub fn buckets(old_count: u64, new_count: u64) -> Vec<Bucket> {
    const WIDTH: u64 = 256;
    let mut out = Vec::new();
    let mut pos = old_count;
    while pos < new_count {
        let bucket_index = pos / WIDTH;
        let bucket_end = (bucket_index + 1) * WIDTH;
        let end = bucket_end.min(new_count);
        out.push(Bucket {
            index: bucket_index,
            new_range: pos..end,
            needs_preload: pos == old_count && old_count % WIDTH != 0,
        });
        pos = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bucket_no_preload_from_zero() {
        let b = buckets(0, 3);
        assert_eq!(b, vec![Bucket { index: 0, new_range: 0..3, needs_preload: false }]);
    }

    #[test]
    fn resumes_a_partially_filled_bucket() {
        let b = buckets(250, 260);
        assert_eq!(
            b,
            vec![
                Bucket { index: 0, new_range: 250..256, needs_preload: true },
                Bucket { index: 1, new_range: 256..260, needs_preload: false },
            ]
        );
    }

    #[test]
    fn spans_three_full_buckets() {
        let b = buckets(256, 768);
        assert_eq!(
            b,
            vec![
                Bucket { index: 1, new_range: 256..512, needs_preload: false },
                Bucket { index: 2, new_range: 512..768, needs_preload: false },
            ]
        );
    }

    #[test]
    fn empty_range_yields_no_buckets() {
        assert_eq!(buckets(5, 5), Vec::new());
    }
}
