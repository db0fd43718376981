//! A small bounded connection pool over blocking `rusqlite::Connection`s.
//!
//! Spec §4.A/§5: concurrent open handles to the same log share a pool
//! bounded at 2 writers and 1 idle reader, with a 5-second wait on
//! contention. `rusqlite` is blocking, so every checked-out connection runs
//! its query inside `tokio::task::spawn_blocking` rather than on the async
//! runtime.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use tlog_types::error::StorageError;

const POOL_WAIT: Duration = Duration::from_secs(5);

/// A bounded pool of SQLite connections for one log's database file.
pub struct ConnectionPool {
    writers: Mutex<Vec<Connection>>,
    readers: Mutex<Vec<Connection>>,
    writer_permits: Semaphore,
    reader_permits: Semaphore,
}

impl ConnectionPool {
    /// Opens `path`, enabling WAL journaling and a busy timeout tuned to the
    /// contention wait, then fills the pool with 2 writer handles and 1
    /// idle reader handle.
    pub fn open(path: &Path, writers: usize, idle_readers: usize) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("creating log dir: {e}")))?;
        }

        let mut writer_conns = Vec::with_capacity(writers);
        for _ in 0..writers {
            writer_conns.push(Self::open_connection(path)?);
        }
        let mut reader_conns = Vec::with_capacity(idle_readers);
        for _ in 0..idle_readers {
            reader_conns.push(Self::open_connection(path)?);
        }

        Ok(Self {
            writers: Mutex::new(writer_conns),
            readers: Mutex::new(reader_conns),
            writer_permits: Semaphore::new(writers),
            reader_permits: Semaphore::new(idle_readers),
        })
    }

    fn open_connection(path: &Path) -> Result<Connection, StorageError> {
        let conn = Connection::open(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        conn.pragma_update(None, "busy_timeout", POOL_WAIT.as_millis() as u64)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(conn)
    }

    /// Runs `f` against a writer connection, offloaded to a blocking thread.
    pub async fn with_writer<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = timeout(POOL_WAIT, self.writer_permits.acquire())
            .await
            .map_err(|_| StorageError::PoolExhausted)?
            .map_err(|_| StorageError::PoolExhausted)?;
        let mut conn = {
            let mut pool = self.writers.lock().await;
            pool.pop().ok_or(StorageError::PoolExhausted)?
        };
        let (result, conn) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (result, conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("writer task panicked: {e}")))?;
        self.writers.lock().await.push(conn);
        result.map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Runs `f` against the idle reader connection, offloaded to a blocking thread.
    pub async fn with_reader<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = timeout(POOL_WAIT, self.reader_permits.acquire())
            .await
            .map_err(|_| StorageError::PoolExhausted)?
            .map_err(|_| StorageError::PoolExhausted)?;
        let mut conn = {
            let mut pool = self.readers.lock().await;
            pool.pop().ok_or(StorageError::PoolExhausted)?
        };
        let (result, conn) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (result, conn)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("reader task panicked: {e}")))?;
        self.readers.lock().await.push(conn);
        result.map_err(|e| StorageError::Backend(e.to_string()))
    }
}
