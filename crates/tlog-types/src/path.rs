//! Tile-tiles path construction and parsing (spec §3, §6).
//!
//! Tiles and entry bundles live at paths like `tile/0/x001/x234/567` or
//! `tile/entries/x000/001`, with an optional `.p/W` suffix when the node is
//! not yet full. Index positions are split into 3-digit groups, each
//! zero-padded and prefixed with `x` except the final (least-significant)
//! group. At least one `x`-prefixed group always precedes the final group,
//! even for indices under 1000.

use crate::error::TlogError;

/// Renders a tile index (the position of a tile within its level) using the
/// tlog-tiles grouped-decimal encoding: `xNNN/.../xNNN/NNN`. Always at least
/// two groups (one forced leading `x000` for indices under 1000), matching
/// the worked examples in spec §8.
fn render_index(mut index: u64) -> String {
    let mut groups = vec![format!("{:03}", index % 1000)];
    index /= 1000;
    while index > 0 {
        groups.push(format!("x{:03}", index % 1000));
        index /= 1000;
    }
    if groups.len() < 2 {
        groups.push("x000".to_string());
    }
    groups.reverse();
    groups.join("/")
}

/// Builds the path for a Merkle tile at `(level, index)`, with `partial`
/// giving its width in `[0, 256)` (0 means full, and is not suffixed).
pub fn tile_path(level: u64, index: u64, partial: u16) -> String {
    let base = format!("tile/{level}/{}", render_index(index));
    if partial == 0 {
        base
    } else {
        format!("{base}.p/{partial}")
    }
}

/// Builds the path for an entry bundle at `bundle_index`, with `partial`
/// giving its entry count in `[0, 256)` (0 means full).
pub fn entry_bundle_path(bundle_index: u64, partial: u16) -> String {
    let base = format!("tile/entries/{}", render_index(bundle_index));
    if partial == 0 {
        base
    } else {
        format!("{base}.p/{partial}")
    }
}

/// A parsed tile-tiles path, distinguishing the three route shapes
/// (spec §6: `/tile/{level}/...`, `/tile/entries/...`, and `checkpoint`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// A Merkle tile at `(level, index)`, optionally partial.
    Tile {
        /// Tree level, 0 = leaves.
        level: u64,
        /// Tile index within the level.
        index: u64,
        /// Partial width, 0 if full.
        partial: u16,
    },
    /// An entry bundle at `bundle_index`, optionally partial.
    EntryBundle {
        /// Bundle index (the bundle's leaves start at `bundle_index * 256`).
        index: u64,
        /// Partial width, 0 if full.
        partial: u16,
    },
    /// The checkpoint path.
    Checkpoint,
}

fn parse_grouped_index(segments: &[&str]) -> Result<u64, TlogError> {
    if segments.is_empty() {
        return Err(TlogError::InvalidPath("empty index".into()));
    }
    let mut index: u64 = 0;
    for (i, seg) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        let digits = if is_last {
            seg.strip_prefix('x').map_or(seg, |_| seg)
        } else {
            seg.strip_prefix('x').ok_or_else(|| {
                TlogError::InvalidPath(format!("expected 'x'-prefixed group, got {seg}"))
            })?
        };
        if is_last && seg.starts_with('x') {
            return Err(TlogError::InvalidPath(format!(
                "final index group must not be 'x'-prefixed: {seg}"
            )));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| TlogError::InvalidPath(format!("non-numeric index group: {seg}")))?;
        if digits.len() != 3 {
            return Err(TlogError::InvalidPath(format!(
                "index group must be zero-padded to 3 digits: {seg}"
            )));
        }
        index = index * 1000 + value;
    }
    Ok(index)
}

/// Splits a trailing `.p/W` partial-width suffix off `path_segments`,
/// returning the base index segments and the partial width (0 if full).
///
/// `tile_path`/`entry_bundle_path` render the suffix with a real `/` (e.g.
/// `.../000.p/3`), so once the router's wildcard capture is split on `/` the
/// suffix arrives as two trailing segments (`"000.p"`, `"3"`), not one.
fn split_partial<'a>(path_segments: &[&'a str]) -> (Vec<&'a str>, u16) {
    if let Some((&width, rest)) = path_segments.split_last() {
        if let Some((&base_group, head)) = rest.split_last() {
            if let Some(base) = base_group.strip_suffix(".p") {
                if let Ok(partial) = width.parse::<u16>() {
                    let mut segments: Vec<&str> = head.to_vec();
                    segments.push(base);
                    return (segments, partial);
                }
            }
        }
    }
    (path_segments.to_vec(), 0)
}

/// Parses an HTTP tile path (spec §6: `level`/`path...` already split out by
/// the router) back into level/index/partial.
pub fn parse_tile_path(level: u64, path_segments: &[&str]) -> Result<ParsedPath, TlogError> {
    if path_segments.is_empty() {
        return Err(TlogError::InvalidPath("empty tile path".into()));
    }
    let (segments, partial) = split_partial(path_segments);
    let index = parse_grouped_index(&segments)?;
    Ok(ParsedPath::Tile {
        level,
        index,
        partial,
    })
}

/// Parses an HTTP entry-bundle path (spec §6: `/tile/entries/{path...}`).
pub fn parse_entry_bundle_path(path_segments: &[&str]) -> Result<ParsedPath, TlogError> {
    if path_segments.is_empty() {
        return Err(TlogError::InvalidPath("empty entry bundle path".into()));
    }
    let (segments, partial) = split_partial(path_segments);
    let index = parse_grouped_index(&segments)?;
    Ok(ParsedPath::EntryBundle { index, partial })
}

/// Validates a `logID` per spec §6: no `/`, `\`, or `.`, and at most 255 bytes.
pub fn validate_log_id(log_id: &str) -> Result<(), TlogError> {
    if log_id.is_empty() || log_id.len() > 255 {
        return Err(TlogError::InvalidPath(format!(
            "logID must be 1..=255 bytes, got {}",
            log_id.len()
        )));
    }
    if log_id.contains(['/', '\\', '.']) {
        return Err(TlogError::InvalidPath(
            "logID must not contain '/', '\\', or '.'".into(),
        ));
    }
    Ok(())
}
