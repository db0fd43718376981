//! The per-log relational state store (spec §4.A).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rusqlite::{params, OptionalExtension};

use tlog_telemetry::storage_metrics;
use tlog_types::entities::{GcProgress, IndexPersistMeta, LogState, Revocation};
use tlog_types::error::StorageError;
use tlog_types::ContentId;

use crate::pool::ConnectionPool;
use crate::schema::SCHEMA;

const WRITER_CONNECTIONS: usize = 2;
const IDLE_READER_CONNECTIONS: usize = 1;

/// Durable, transactional, crash-safe metadata for one log.
pub struct StateStore {
    pool: ConnectionPool,
    space_id: String,
}

impl StateStore {
    /// Opens (creating if absent) the database file at
    /// `{base_dir}/logs/{space_id}/log.db` (spec §6 "Persisted state").
    pub async fn open(base_dir: &Path, space_id: &str) -> Result<Self, StorageError> {
        let db_path: PathBuf = base_dir.join("logs").join(space_id).join("log.db");
        let pool = ConnectionPool::open(&db_path, WRITER_CONNECTIONS, IDLE_READER_CONNECTIONS)?;
        let store = Self {
            pool,
            space_id: space_id.to_string(),
        };
        store
            .pool
            .with_writer(|conn| conn.execute_batch(SCHEMA))
            .await?;
        Ok(store)
    }

    async fn timed_write<F, T>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let result = self.pool.with_writer(f).await;
        storage_metrics().observe_query_duration(op, start.elapsed().as_secs_f64());
        storage_metrics().inc_queries_total(op, if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn timed_read<F, T>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let start = Instant::now();
        let result = self.pool.with_reader(f).await;
        storage_metrics().observe_query_duration(op, start.elapsed().as_secs_f64());
        storage_metrics().inc_queries_total(op, if result.is_ok() { "ok" } else { "error" });
        result
    }

    /// Creates the log row and its zero-size tree state if they do not
    /// already exist. Idempotent: calling this on an already-created log is
    /// a no-op (spec §3 "Lifecycle": creation happens on first authenticated
    /// `create`; logs are never deleted).
    pub async fn create_log(&self, now_ms: i64) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("create_log", move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO logs (space_id, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?2)",
                params![space_id, now_ms],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO tree_state (space_id, tree_size, root) VALUES (?1, 0, ?2)",
                params![space_id, empty_root_bytes()],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO gc_progress (space_id, from_size) VALUES (?1, 0)",
                params![space_id],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// `GetTreeState`: the log's current size and root, if the log exists.
    pub async fn get_log_state(&self) -> Result<Option<LogState>, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("get_log_state", move |conn| {
            conn.query_row(
                "SELECT l.space_id, l.created_at_ms, l.updated_at_ms, t.tree_size, t.root
                 FROM logs l JOIN tree_state t ON t.space_id = l.space_id
                 WHERE l.space_id = ?1",
                params![space_id],
                |row| {
                    let root_bytes: Vec<u8> = row.get(4)?;
                    let mut root = [0u8; 32];
                    let n = root_bytes.len().min(32);
                    root[..n].copy_from_slice(&root_bytes[..n]);
                    Ok(LogState {
                        space_id: row.get(0)?,
                        created_at_ms: row.get(1)?,
                        updated_at_ms: row.get(2)?,
                        tree_size: row.get::<_, i64>(3)? as u64,
                        root,
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// `SetTreeState(size, root)`.
    pub async fn set_tree_state(&self, size: u64, root: [u8; 32], now_ms: i64) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("set_tree_state", move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE tree_state SET tree_size = ?2, root = ?3 WHERE space_id = ?1",
                params![space_id, size as i64, root.to_vec()],
            )?;
            tx.execute(
                "UPDATE logs SET updated_at_ms = ?2 WHERE space_id = ?1",
                params![space_id, now_ms],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// `GetCIDIndex`: the full path→content-id mapping for this log.
    pub async fn get_cid_index(&self) -> Result<HashMap<String, ContentId>, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("get_cid_index", move |conn| {
            let mut stmt =
                conn.prepare("SELECT path, content_id FROM cid_index WHERE space_id = ?1")?;
            let rows = stmt.query_map(params![space_id], |row| {
                let path: String = row.get(0)?;
                let cid: String = row.get(1)?;
                Ok((path, cid))
            })?;
            let mut out = HashMap::new();
            for row in rows {
                let (path, cid) = row?;
                if let Ok(id) = ContentId::parse(&cid) {
                    out.insert(path, id);
                }
            }
            Ok(out)
        })
        .await
    }

    /// `SetCID(path, id)`.
    pub async fn set_cid(&self, path: &str, id: ContentId) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        let path = path.to_string();
        self.timed_write("set_cid", move |conn| {
            conn.execute(
                "INSERT INTO cid_index (space_id, path, content_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(space_id, path) DO UPDATE SET content_id = excluded.content_id",
                params![space_id, path, id.to_cid_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// `SetCIDs(map)`: a single transaction over a batch of path→id writes.
    pub async fn set_cids(&self, entries: Vec<(String, ContentId)>) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("set_cids", move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO cid_index (space_id, path, content_id) VALUES (?1, ?2, ?3)
                     ON CONFLICT(space_id, path) DO UPDATE SET content_id = excluded.content_id",
                )?;
                for (path, id) in &entries {
                    stmt.execute(params![space_id, path, id.to_cid_string()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// `DeleteCID(path)`: removes exactly one row, no-op if absent.
    pub async fn delete_cid(&self, path: &str) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        let path = path.to_string();
        self.timed_write("delete_cid", move |conn| {
            conn.execute(
                "DELETE FROM cid_index WHERE space_id = ?1 AND path = ?2",
                params![space_id, path],
            )?;
            Ok(())
        })
        .await
    }

    /// `DeleteCIDsWithPrefix(prefix)`, returning the number of rows removed.
    pub async fn delete_cids_with_prefix(&self, prefix: &str) -> Result<u64, StorageError> {
        let space_id = self.space_id.clone();
        let like_pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        self.timed_write("delete_cids_with_prefix", move |conn| {
            let n = conn.execute(
                "DELETE FROM cid_index WHERE space_id = ?1 AND path LIKE ?2 ESCAPE '\\'",
                params![space_id, like_pattern],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// `AddRevocation(id)`. Idempotent: a second call for the same id does
    /// not error and the set still contains it once (spec §8).
    pub async fn add_revocation(&self, token_cid: ContentId, now_ms: i64) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("add_revocation", move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO revocations (space_id, token_cid, revoked_at_ms) VALUES (?1, ?2, ?3)",
                params![space_id, token_cid.to_cid_string(), now_ms],
            )?;
            Ok(())
        })
        .await
    }

    /// `IsRevoked(id)`.
    pub async fn is_revoked(&self, token_cid: ContentId) -> Result<bool, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("is_revoked", move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM revocations WHERE space_id = ?1 AND token_cid = ?2",
                params![space_id, token_cid.to_cid_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// `GetRevocations`.
    pub async fn get_revocations(&self) -> Result<Vec<Revocation>, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("get_revocations", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT token_cid, revoked_at_ms FROM revocations WHERE space_id = ?1",
            )?;
            let rows = stmt.query_map(params![space_id], |row| {
                let cid: String = row.get(0)?;
                let revoked_at_ms: i64 = row.get(1)?;
                Ok((cid, revoked_at_ms))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (cid, revoked_at_ms) = row?;
                if let Ok(token_cid) = ContentId::parse(&cid) {
                    out.push(Revocation {
                        token_cid,
                        revoked_at_ms,
                    });
                }
            }
            Ok(out)
        })
        .await
    }

    /// `GetIndexPersistence`.
    pub async fn get_index_persistence(&self) -> Result<Option<IndexPersistMeta>, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("get_index_persistence", move |conn| {
            conn.query_row(
                "SELECT root_cid, version, entry_count, last_upload_ms
                 FROM index_persistence WHERE space_id = ?1",
                params![space_id],
                |row| {
                    let cid: String = row.get(0)?;
                    Ok((cid, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?))
                },
            )
            .optional()
            .map(|maybe| {
                maybe.and_then(|(cid, version, entry_count, last_upload_ms)| {
                    ContentId::parse(&cid).ok().map(|root_cid| IndexPersistMeta {
                        root_cid,
                        version: version as u64,
                        entry_count: entry_count as u64,
                        last_upload_ms,
                    })
                })
            })
        })
        .await
    }

    /// `SetIndexPersistence(time, size, rootId)`.
    pub async fn set_index_persistence(&self, meta: IndexPersistMeta) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("set_index_persistence", move |conn| {
            conn.execute(
                "INSERT INTO index_persistence (space_id, root_cid, version, entry_count, last_upload_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(space_id) DO UPDATE SET
                    root_cid = excluded.root_cid,
                    version = excluded.version,
                    entry_count = excluded.entry_count,
                    last_upload_ms = excluded.last_upload_ms",
                params![
                    space_id,
                    meta.root_cid.to_cid_string(),
                    meta.version as i64,
                    meta.entry_count as i64,
                    meta.last_upload_ms,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// `GetGCProgress`.
    pub async fn get_gc_progress(&self) -> Result<GcProgress, StorageError> {
        let space_id = self.space_id.clone();
        self.timed_read("get_gc_progress", move |conn| {
            let from_size: Option<i64> = conn
                .query_row(
                    "SELECT from_size FROM gc_progress WHERE space_id = ?1",
                    params![space_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(GcProgress {
                from_size: from_size.unwrap_or(0) as u64,
            })
        })
        .await
    }

    /// `SetGCProgress`.
    pub async fn set_gc_progress(&self, progress: GcProgress) -> Result<(), StorageError> {
        let space_id = self.space_id.clone();
        self.timed_write("set_gc_progress", move |conn| {
            conn.execute(
                "INSERT INTO gc_progress (space_id, from_size) VALUES (?1, ?2)
                 ON CONFLICT(space_id) DO UPDATE SET from_size = excluded.from_size",
                params![space_id, progress.from_size as i64],
            )?;
            Ok(())
        })
        .await
    }

    /// The logical `GetHead`: joins tree size from `tree_state` with the
    /// last-published index root content-id from `index_persistence` (spec
    /// §4.A's closing sentence).
    pub async fn get_head(&self) -> Result<(Option<ContentId>, u64), StorageError> {
        let state = self.get_log_state().await?;
        let persisted = self.get_index_persistence().await?;
        let tree_size = state.map(|s| s.tree_size).unwrap_or(0);
        Ok((persisted.map(|p| p.root_cid), tree_size))
    }
}

fn empty_root_bytes() -> Vec<u8> {
    use sha2::{Digest, Sha256};
    Sha256::digest([]).to_vec()
}
