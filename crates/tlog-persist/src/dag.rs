//! Packages a flat path→content-id mapping into a content-addressed
//! directory DAG (component 4.I).
//!
//! Paths are split on `/`; intermediate directories are built
//! deterministically with their children sorted by name. A leaf entry is a
//! *proxy link*: it carries the name and content-id of an already-stored
//! blob without re-including its bytes. Directory node bytes are this
//! crate's own canonical JSON encoding rather than a binary UnixFS/dag-pb
//! codec, which this service has no other use for (see DESIGN.md).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tlog_types::ContentId;

/// One child of a directory node, sorted by `name` when a directory is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirEntry {
    /// The path segment naming this child within its parent.
    pub name: String,
    /// The content-id of the child (a tile/bundle blob, or a nested directory node).
    pub content_id: ContentId,
    /// Whether `content_id` refers to a nested directory node rather than a leaf blob.
    pub is_dir: bool,
}

/// A directory node's serialized form: its sorted children.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirNode {
    /// Children sorted by name.
    pub entries: Vec<DirEntry>,
}

impl DirNode {
    fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("DirNode serializes")
    }
}

/// The packaged result: the root directory's content-id and every
/// directory-node block that must ship in the CAR (leaf blobs are not
/// included; they already live in the blob backend).
pub struct PackagedIndex {
    /// Content-id of the top-level directory node.
    pub root: ContentId,
    /// `(content_id, bytes)` for every directory node in the tree, including the root.
    pub blocks: Vec<(ContentId, Vec<u8>)>,
    /// Number of path→content-id entries packaged.
    pub entry_count: u64,
}

enum Node {
    File(ContentId),
    Dir(BTreeMap<String, Node>),
}

/// Builds the directory DAG for `paths` and returns its root content-id plus
/// every directory block to upload.
pub fn package_index(paths: &BTreeMap<String, ContentId>) -> PackagedIndex {
    let mut root: BTreeMap<String, Node> = BTreeMap::new();
    for (path, id) in paths {
        insert(&mut root, path.split('/').collect::<Vec<_>>().as_slice(), *id);
    }
    let mut blocks = Vec::new();
    let root_id = render(&root, &mut blocks);
    PackagedIndex {
        root: root_id,
        blocks,
        entry_count: paths.len() as u64,
    }
}

fn insert(dir: &mut BTreeMap<String, Node>, segments: &[&str], id: ContentId) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        dir.insert((*head).to_string(), Node::File(id));
        return;
    }
    match dir.entry((*head).to_string()).or_insert_with(|| Node::Dir(BTreeMap::new())) {
        Node::Dir(children) => insert(children, rest, id),
        Node::File(_) => {
            // A path collides with an already-inserted leaf at this segment;
            // the mapping is malformed (e.g. both "a" and "a/b" as paths).
            // Leave the existing leaf in place and drop the longer path.
        }
    }
}

fn render(dir: &BTreeMap<String, Node>, blocks: &mut Vec<(ContentId, Vec<u8>)>) -> ContentId {
    let mut entries = Vec::with_capacity(dir.len());
    for (name, node) in dir {
        let (content_id, is_dir) = match node {
            Node::File(id) => (*id, false),
            Node::Dir(children) => (render(children, blocks), true),
        };
        entries.push(DirEntry { name: name.clone(), content_id, is_dir });
    }
    let node = DirNode { entries };
    let bytes = node.to_bytes();
    let id = ContentId::of(&bytes);
    blocks.push((id, bytes));
    id
}

/// Serializes a packaged index's blocks into this service's CAR framing: a
/// JSON header naming the root, followed by each block as a length-prefixed
/// `(content-id string, bytes)` pair.
pub fn encode_car(packaged: &PackagedIndex) -> Vec<u8> {
    #[derive(Serialize)]
    struct Header<'a> {
        version: u8,
        root: &'a str,
    }
    let root_str = packaged.root.to_cid_string();
    let header = serde_json::to_vec(&Header { version: 1, root: &root_str }).expect("header serializes");

    let mut out = Vec::new();
    out.extend_from_slice(&(header.len() as u32).to_be_bytes());
    out.extend_from_slice(&header);
    for (id, bytes) in &packaged.blocks {
        let id_str = id.to_cid_string();
        out.extend_from_slice(&(id_str.len() as u32).to_be_bytes());
        out.extend_from_slice(id_str.as_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> ContentId {
        ContentId::of(label.as_bytes())
    }

    #[test]
    fn builds_sorted_nested_directories() {
        let mut paths = BTreeMap::new();
        paths.insert("tile/0/x000/001".to_string(), id("a"));
        paths.insert("tile/0/x000/000".to_string(), id("b"));
        paths.insert("checkpoint".to_string(), id("c"));

        let packaged = package_index(&paths);
        assert_eq!(packaged.entry_count, 3);
        // root + "tile" dir + "0" dir => 3 directory blocks.
        assert_eq!(packaged.blocks.len(), 3);

        let root_bytes = packaged
            .blocks
            .iter()
            .find(|(cid, _)| *cid == packaged.root)
            .map(|(_, b)| b)
            .expect("root block present");
        let root: DirNode = serde_json::from_slice(root_bytes).expect("decode");
        let names: Vec<&str> = root.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["checkpoint", "tile"]);
    }

    #[test]
    fn identical_mappings_produce_identical_roots() {
        let mut a = BTreeMap::new();
        a.insert("x/y".to_string(), id("1"));
        a.insert("x/z".to_string(), id("2"));
        let mut b = BTreeMap::new();
        b.insert("x/z".to_string(), id("2"));
        b.insert("x/y".to_string(), id("1"));

        assert_eq!(package_index(&a).root, package_index(&b).root);
    }

    #[test]
    fn car_round_trips_header_and_blocks() {
        let mut paths = BTreeMap::new();
        paths.insert("checkpoint".to_string(), id("c"));
        let packaged = package_index(&paths);
        let bytes = encode_car(&packaged);
        assert!(!bytes.is_empty());
    }
}
