//! Table definitions for one log's SQLite database (spec §6 "Persisted state").

/// DDL applied to every freshly opened log database. `logs` is the parent
/// row; the rest cascade-delete from it, though in practice a log row is
/// never deleted (spec §3 "Lifecycle": logs are never deleted).
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    space_id        TEXT PRIMARY KEY,
    created_at_ms   INTEGER NOT NULL,
    updated_at_ms   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tree_state (
    space_id   TEXT PRIMARY KEY REFERENCES logs(space_id) ON DELETE CASCADE,
    tree_size  INTEGER NOT NULL,
    root       BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS cid_index (
    space_id  TEXT NOT NULL REFERENCES logs(space_id) ON DELETE CASCADE,
    path      TEXT NOT NULL,
    content_id TEXT NOT NULL,
    PRIMARY KEY (space_id, path)
);

CREATE TABLE IF NOT EXISTS revocations (
    space_id      TEXT NOT NULL REFERENCES logs(space_id) ON DELETE CASCADE,
    token_cid     TEXT NOT NULL,
    revoked_at_ms INTEGER NOT NULL,
    PRIMARY KEY (space_id, token_cid)
);

CREATE TABLE IF NOT EXISTS index_persistence (
    space_id       TEXT PRIMARY KEY REFERENCES logs(space_id) ON DELETE CASCADE,
    root_cid       TEXT NOT NULL,
    version        INTEGER NOT NULL,
    entry_count    INTEGER NOT NULL,
    last_upload_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS gc_progress (
    space_id  TEXT PRIMARY KEY REFERENCES logs(space_id) ON DELETE CASCADE,
    from_size INTEGER NOT NULL
);
"#;
