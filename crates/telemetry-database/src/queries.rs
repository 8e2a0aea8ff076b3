//! Standalone query functions for the per-stream queue tables.
//!
//! Each function takes the connection as its first parameter so it can run
//! inside `AsyncDatabase::call` or directly against a test connection.
//! Functions that must be atomic across several statements take
//! `&mut Connection` and open their own transaction.

use crate::{AppendOutcome, Batch, DatabaseError, DatabaseResult, NewRecord, Record, Stream};
use rusqlite::{params, Connection, ErrorCode, ToSql};
use tracing::{debug, warn};

/// How many times an insert that hit `SQLITE_FULL` is retried, evicting one
/// oldest row before each retry.
pub const MAX_DISK_FULL_RETRIES: usize = 3;

// ==========================================
// Writes
// ==========================================

/// Append one record, evicting the oldest rows of the stream while it sits
/// at `max_rows`.
///
/// Ceiling eviction and the insert share one transaction. If SQLite reports
/// the database itself is full, one oldest row is evicted in its own
/// transaction and the append is retried.
pub fn append_record(
    conn: &mut Connection,
    record: &NewRecord,
    created_at: i64,
    max_rows: u64,
) -> DatabaseResult<AppendOutcome> {
    let mut disk_full_evictions = 0u64;

    for attempt in 0..=MAX_DISK_FULL_RETRIES {
        match try_append(conn, record, created_at, max_rows) {
            Ok(mut outcome) => {
                outcome.evicted += disk_full_evictions;
                return Ok(outcome);
            }
            Err(DatabaseError::Sqlite(e)) if is_disk_full(&e) => {
                if attempt == MAX_DISK_FULL_RETRIES {
                    break;
                }
                let removed = evict_oldest(conn, record.stream)?;
                if removed == 0 {
                    break;
                }
                disk_full_evictions += removed as u64;
                warn!(
                    stream = %record.stream,
                    attempt = attempt + 1,
                    "Database full, evicted oldest record before retrying append"
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(DatabaseError::StorageFull(record.stream.to_string()))
}

fn try_append(
    conn: &mut Connection,
    record: &NewRecord,
    created_at: i64,
    max_rows: u64,
) -> DatabaseResult<AppendOutcome> {
    let table = record.stream.table_name();
    let tx = conn.transaction()?;

    let mut evicted = 0u64;
    if max_rows > 0 {
        let mut rows = count_all(&tx, record.stream)?;
        while rows >= max_rows {
            if evict_oldest(&tx, record.stream)? == 0 {
                break;
            }
            evicted += 1;
            rows -= 1;
        }
    }

    tx.execute(
        &format!("INSERT INTO {table} (token, data, created_at) VALUES (?1, ?2, ?3)"),
        params![record.token, record.data, created_at],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    if evicted > 0 {
        debug!(stream = %record.stream, evicted, "Evicted oldest records at stream ceiling");
    }

    Ok(AppendOutcome { id, evicted })
}

/// Delete the single oldest record of a stream. Returns the rows removed.
pub fn evict_oldest(conn: &Connection, stream: Stream) -> DatabaseResult<usize> {
    let table = stream.table_name();
    let removed = conn.execute(
        &format!("DELETE FROM {table} WHERE id = (SELECT MIN(id) FROM {table})"),
        [],
    )?;
    Ok(removed)
}

/// Delete exactly the given record ids.
pub fn delete_batch(conn: &mut Connection, stream: Stream, ids: &[i64]) -> DatabaseResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders = std::iter::repeat("?")
        .take(ids.len())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "DELETE FROM {} WHERE id IN ({})",
        stream.table_name(),
        placeholders
    );

    let mut params_vec: Vec<&dyn ToSql> = Vec::with_capacity(ids.len());
    for id in ids {
        params_vec.push(id);
    }

    let tx = conn.transaction()?;
    let removed = tx.execute(&sql, params_vec.as_slice())?;
    tx.commit()?;
    Ok(removed)
}

/// Delete every record created at or before `cutoff` (ms since epoch).
pub fn purge_older_than(conn: &Connection, stream: Stream, cutoff: i64) -> DatabaseResult<usize> {
    let removed = conn.execute(
        &format!("DELETE FROM {} WHERE created_at <= ?1", stream.table_name()),
        params![cutoff],
    )?;
    Ok(removed)
}

/// Delete every record owned by a token.
pub fn delete_token(conn: &Connection, stream: Stream, token: &str) -> DatabaseResult<usize> {
    let removed = conn.execute(
        &format!("DELETE FROM {} WHERE token = ?1", stream.table_name()),
        params![token],
    )?;
    Ok(removed)
}

// ==========================================
// Reads
// ==========================================

/// Read up to `max_rows` of a token's records in ascending id order, stopping
/// before the cumulative payload size would exceed `max_bytes`.
///
/// The first record is always included so a single oversized payload cannot
/// stall the stream.
pub fn peek_batch(
    conn: &Connection,
    stream: Stream,
    token: &str,
    max_rows: usize,
    max_bytes: usize,
) -> DatabaseResult<Batch> {
    let mut batch = Batch::empty(stream, token);
    if max_rows == 0 {
        return Ok(batch);
    }

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT id, token, data, created_at FROM {}
         WHERE token = ?1
         ORDER BY id ASC
         LIMIT ?2",
        stream.table_name()
    ))?;

    let rows = stmt.query_map(params![token, max_rows as i64], |row| {
        Ok(Record {
            id: row.get(0)?,
            stream,
            token: row.get(1)?,
            data: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;

    let mut bytes = 0usize;
    for row in rows {
        let record = row?;
        let next = bytes + record.data.len();
        if !batch.records.is_empty() && next > max_bytes {
            break;
        }
        bytes = next;
        batch.records.push(record);
    }

    Ok(batch)
}

/// Count a token's records in a stream.
pub fn count(conn: &Connection, stream: Stream, token: &str) -> DatabaseResult<u64> {
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE token = ?1", stream.table_name()),
        params![token],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Count every record in a stream regardless of token.
pub fn count_all(conn: &Connection, stream: Stream) -> DatabaseResult<u64> {
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", stream.table_name()),
        [],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Tokens with at least one record, ordered by their oldest record.
pub fn distinct_tokens(conn: &Connection, stream: Stream) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT token FROM {} GROUP BY token ORDER BY MIN(id) ASC",
        stream.table_name()
    ))?;
    let tokens = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(tokens)
}

/// Per-token counts for a stream.
pub fn token_counts(conn: &Connection, stream: Stream) -> DatabaseResult<Vec<(String, u64)>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT token, COUNT(*) FROM {} GROUP BY token ORDER BY MIN(id) ASC",
        stream.table_name()
    ))?;
    let counts = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

fn is_disk_full(e: &rusqlite::Error) -> bool {
    e.sqlite_error_code() == Some(ErrorCode::DiskFull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;

    fn create_test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn append(conn: &mut Connection, stream: Stream, token: &str, data: &str, max_rows: u64) -> AppendOutcome {
        append_record(conn, &NewRecord::new(stream, token, data), 1_000, max_rows).unwrap()
    }

    #[test]
    fn test_append_and_peek_in_insertion_order() {
        let mut conn = create_test_conn();
        for i in 0..3 {
            append(&mut conn, Stream::Events, "T", &format!("{{\"n\":{i}}}"), 100);
        }

        let batch = peek_batch(&conn, Stream::Events, "T", 10, usize::MAX).unwrap();
        let data: Vec<_> = batch.records.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["{\"n\":0}", "{\"n\":1}", "{\"n\":2}"]);
        assert!(batch.ids().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ceiling_keeps_most_recent() {
        let mut conn = create_test_conn();
        let mut evicted = 0;
        for i in 0..7 {
            evicted += append(&mut conn, Stream::Events, "T", &i.to_string(), 5).evicted;
            assert!(count_all(&conn, Stream::Events).unwrap() <= 5);
        }

        assert_eq!(evicted, 2);
        assert_eq!(count(&conn, Stream::Events, "T").unwrap(), 5);
        let batch = peek_batch(&conn, Stream::Events, "T", 10, usize::MAX).unwrap();
        let data: Vec<_> = batch.records.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["2", "3", "4", "5", "6"]);
    }

    #[test]
    fn test_ceiling_counts_all_tokens() {
        let mut conn = create_test_conn();
        append(&mut conn, Stream::People, "A", "a1", 2);
        append(&mut conn, Stream::People, "B", "b1", 2);
        let outcome = append(&mut conn, Stream::People, "B", "b2", 2);

        assert_eq!(outcome.evicted, 1);
        assert_eq!(count(&conn, Stream::People, "A").unwrap(), 0);
        assert_eq!(count(&conn, Stream::People, "B").unwrap(), 2);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut conn = create_test_conn();
        append(&mut conn, Stream::Events, "T", "e", 1);
        append(&mut conn, Stream::People, "T", "p", 1);
        append(&mut conn, Stream::Groups, "T", "g", 1);
        append(&mut conn, Stream::Events, "T", "e2", 1);

        assert_eq!(count(&conn, Stream::Events, "T").unwrap(), 1);
        assert_eq!(count(&conn, Stream::People, "T").unwrap(), 1);
        assert_eq!(count(&conn, Stream::Groups, "T").unwrap(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut conn = create_test_conn();
        let first = append(&mut conn, Stream::Events, "T", "a", 0);
        delete_batch(&mut conn, Stream::Events, &[first.id]).unwrap();
        let second = append(&mut conn, Stream::Events, "T", "b", 0);
        assert!(second.id > first.id);
    }

    #[test]
    fn test_peek_respects_row_and_byte_limits() {
        let mut conn = create_test_conn();
        for _ in 0..5 {
            append(&mut conn, Stream::Events, "T", "0123456789", 100);
        }

        let by_rows = peek_batch(&conn, Stream::Events, "T", 3, usize::MAX).unwrap();
        assert_eq!(by_rows.len(), 3);

        let by_bytes = peek_batch(&conn, Stream::Events, "T", 10, 25).unwrap();
        assert_eq!(by_bytes.len(), 2);
        assert!(by_bytes.payload_bytes() <= 25);

        // An oversized first record is still returned on its own.
        let oversized = peek_batch(&conn, Stream::Events, "T", 10, 4).unwrap();
        assert_eq!(oversized.len(), 1);

        let none = peek_batch(&conn, Stream::Events, "T", 0, usize::MAX).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_peek_filters_by_token_and_does_not_mutate() {
        let mut conn = create_test_conn();
        append(&mut conn, Stream::Events, "A", "a", 100);
        append(&mut conn, Stream::Events, "B", "b", 100);

        let batch = peek_batch(&conn, Stream::Events, "B", 10, usize::MAX).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].data, "b");
        assert_eq!(batch.token, "B");
        assert_eq!(count_all(&conn, Stream::Events).unwrap(), 2);
    }

    #[test]
    fn test_delete_batch_removes_exactly_given_ids() {
        let mut conn = create_test_conn();
        for i in 0..4 {
            append(&mut conn, Stream::Events, "T", &i.to_string(), 100);
        }
        let batch = peek_batch(&conn, Stream::Events, "T", 2, usize::MAX).unwrap();
        let removed = delete_batch(&mut conn, Stream::Events, &batch.ids()).unwrap();

        assert_eq!(removed, 2);
        let rest = peek_batch(&conn, Stream::Events, "T", 10, usize::MAX).unwrap();
        let data: Vec<_> = rest.records.iter().map(|r| r.data.as_str()).collect();
        assert_eq!(data, vec!["2", "3"]);
        assert_eq!(delete_batch(&mut conn, Stream::Events, &[]).unwrap(), 0);
    }

    #[test]
    fn test_purge_older_than_is_inclusive() {
        let mut conn = create_test_conn();
        for (ts, data) in [(100, "old"), (200, "edge"), (300, "new")] {
            append_record(&mut conn, &NewRecord::new(Stream::Groups, "T", data), ts, 100).unwrap();
        }

        let removed = purge_older_than(&conn, Stream::Groups, 200).unwrap();
        assert_eq!(removed, 2);
        let rest = peek_batch(&conn, Stream::Groups, "T", 10, usize::MAX).unwrap();
        assert_eq!(rest.records.len(), 1);
        assert_eq!(rest.records[0].data, "new");
    }

    #[test]
    fn test_delete_token_and_distinct_tokens() {
        let mut conn = create_test_conn();
        append(&mut conn, Stream::Events, "B", "b", 100);
        append(&mut conn, Stream::Events, "A", "a", 100);
        append(&mut conn, Stream::Events, "B", "b2", 100);

        assert_eq!(distinct_tokens(&conn, Stream::Events).unwrap(), vec!["B", "A"]);
        assert_eq!(
            token_counts(&conn, Stream::Events).unwrap(),
            vec![("B".to_string(), 2), ("A".to_string(), 1)]
        );

        assert_eq!(delete_token(&conn, Stream::Events, "B").unwrap(), 2);
        assert_eq!(distinct_tokens(&conn, Stream::Events).unwrap(), vec!["A"]);
    }

    #[test]
    fn test_disk_full_evicts_oldest_and_retries() {
        let mut conn = create_test_conn();
        let pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0)).unwrap();
        let _: i64 = conn
            .query_row(&format!("PRAGMA max_page_count = {}", pages + 8), [], |row| row.get(0))
            .unwrap();

        let payload = "x".repeat(10_000);
        let mut last_id = 0;
        for _ in 0..10 {
            let outcome = append(&mut conn, Stream::Events, "T", &payload, 1_000);
            last_id = outcome.id;
        }

        let remaining = count(&conn, Stream::Events, "T").unwrap();
        assert!(remaining > 0 && remaining < 10);
        let batch = peek_batch(&conn, Stream::Events, "T", 10, usize::MAX).unwrap();
        assert_eq!(batch.records.last().unwrap().id, last_id);
    }
}
