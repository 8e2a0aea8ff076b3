//! Schema versions for the queue database.
//!
//! Each step runs inside its own transaction together with the row that
//! records it in `migrations`, so a crash mid-upgrade leaves the previous
//! version intact.

use crate::{DatabaseResult, Stream};
use rusqlite::{params, Connection, Transaction};
use tracing::{debug, info};

/// Highest schema version this build knows about.
pub const CURRENT_VERSION: i32 = 2;

type Step = fn(&Transaction<'_>) -> DatabaseResult<()>;

const STEPS: [(i32, &str, Step); 2] = [
    (1, "stream_tables", create_stream_tables),
    (2, "created_at_indexes", create_created_at_indexes),
];

/// Bring `conn` up to `CURRENT_VERSION`.
pub fn run_migrations(conn: &mut Connection) -> DatabaseResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let applied = schema_version(conn)?;
    if applied >= CURRENT_VERSION {
        debug!(version = applied, "Queue schema up to date");
        return Ok(());
    }

    info!(from = applied, to = CURRENT_VERSION, "Upgrading queue schema");
    for (version, name, step) in STEPS.iter().filter(|(v, _, _)| *v > applied) {
        let tx = conn.transaction()?;
        step(&tx)?;
        tx.execute(
            "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        debug!(version, name, "Schema step applied");
    }
    Ok(())
}

/// Version recorded in the `migrations` table, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> DatabaseResult<i32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// One append-only table per stream. AUTOINCREMENT keeps ids monotonic even
/// after the newest row is deleted.
fn create_stream_tables(tx: &Transaction<'_>) -> DatabaseResult<()> {
    for stream in Stream::ALL {
        let table = stream.table_name();
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_token_id ON {table}(token, id);"
        ))?;
    }
    Ok(())
}

/// Retention purges filter on `created_at` alone.
fn create_created_at_indexes(tx: &Transaction<'_>) -> DatabaseResult<()> {
    for stream in Stream::ALL {
        let table = stream.table_name();
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at);"
        ))?;
    }
    Ok(())
}
