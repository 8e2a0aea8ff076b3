//! Owner of the single SQLite connection behind a queue store.
//!
//! `tokio_rusqlite` keeps the connection on its own thread and runs the
//! closures handed to `call` one at a time, in submission order. Keep those
//! closures to SQL: payload encoding and network calls belong outside.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use tracing::info;

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

impl From<tokio_rusqlite::Error> for DatabaseError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Rusqlite(e) => Self::Sqlite(e),
            tokio_rusqlite::Error::ConnectionClosed | tokio_rusqlite::Error::Close(_) => {
                Self::Unavailable("queue connection closed".into())
            }
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Migrated connection with a dedicated executor thread.
///
/// Cheap to clone; clones share the same thread and queue of calls.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    location: Option<PathBuf>,
}

impl AsyncDatabase {
    /// Open (or create) the queue file at `path` and bring its schema up to
    /// date. Missing parent directories are created.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))?;
        conn.call(|conn| Ok(conn.execute_batch(PRAGMAS)?)).await?;

        let db = Self::migrated(conn, Some(path.to_path_buf())).await?;
        info!(path = %path.display(), "Queue database ready");
        Ok(db)
    }

    /// Private in-memory database. Nothing survives `close`.
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Unavailable(e.to_string()))?;
        Self::migrated(conn, None).await
    }

    async fn migrated(conn: Connection, location: Option<PathBuf>) -> DatabaseResult<Self> {
        let db = Self { conn, location };
        db.call(|conn| {
            migrations::run_migrations(conn).map_err(|e| DatabaseError::Migration(e.to_string()))
        })
        .await?;
        Ok(db)
    }

    /// Run `f` on the executor thread and wait for its result.
    ///
    /// # Rules
    ///
    /// - Calls run one at a time in the order they were made, across every
    ///   clone of this handle. A transaction opened inside `f` is therefore
    ///   never interleaved with another call.
    /// - Keep `f` to SQL. It blocks the executor thread, and every other
    ///   caller, for as long as it runs.
    /// - `f` cannot borrow from the caller; move owned values in.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `Unavailable` once the connection has
    /// been closed.
    ///
    /// ```ignore
    /// let rows = db
    ///     .call(move |conn| queries::count(conn, Stream::Events, &token))
    ///     .await?;
    /// ```
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our own error type travels inside tokio_rusqlite's Ok variant.
        self.conn.call(move |conn| Ok(f(conn))).await?
    }

    /// Backing file, `None` for in-memory databases.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Stop the executor thread once queued calls have finished.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Unavailable(format!("close failed: {:?}", e)))?;
        if let Some(path) = &self.location {
            info!(path = %path.display(), "Queue database closed");
        }
        Ok(())
    }
}
