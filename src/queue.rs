//! Sync queue: the ordered log of local mutations pending reconciliation.
//!
//! Adapters only ever append. The external reconciliation process drains it
//! through `pending` / `mark_applied` / `mark_failed`; each entry carries
//! the store, operation, record id, and the payload at mutation time, so it
//! can be replayed independently and in original order. Cascade side-effect
//! writes never appear here.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DataError, DataResult};

/// Entries flip to `failed` once they have burned this many retries.
pub const MAX_RETRIES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueOperation::Create => "create",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        }
    }

    fn parse(value: &str) -> DataResult<Self> {
        match value {
            "create" => Ok(QueueOperation::Create),
            "update" => Ok(QueueOperation::Update),
            "delete" => Ok(QueueOperation::Delete),
            other => Err(DataError::Storage(format!(
                "unknown queue operation '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub store_name: String,
    pub record_id: String,
    pub operation: QueueOperation,
    pub payload: Value,
    pub idempotency_key: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: String,
}

/// Append a mutation to the queue. Returns the queue row id.
pub(crate) fn enqueue(
    conn: &Connection,
    store: &str,
    operation: QueueOperation,
    record_id: &str,
    payload: &Value,
) -> DataResult<i64> {
    let idempotency_key = format!(
        "{store}:{record_id}:{}:{}",
        operation.as_str(),
        Uuid::new_v4()
    );
    conn.execute(
        "INSERT INTO sync_queue (store_name, record_id, operation, payload, idempotency_key)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            store,
            record_id,
            operation.as_str(),
            payload.to_string(),
            idempotency_key
        ],
    )
    .map_err(|e| DataError::Storage(format!("enqueue sync: {e}")))?;

    let id = conn.last_insert_rowid();
    debug!(store, record_id, operation = operation.as_str(), queue_id = id, "mutation queued");
    Ok(id)
}

/// Pending entries in original append order.
pub fn pending(conn: &Connection) -> DataResult<Vec<QueueEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_name, record_id, operation, payload, idempotency_key,
                retry_count, last_error, created_at
         FROM sync_queue
         WHERE status = 'pending'
         ORDER BY id",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i64>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, store_name, record_id, op, payload, idempotency_key, retry_count, last_error, created_at) =
            row?;
        entries.push(QueueEntry {
            id,
            store_name,
            record_id,
            operation: QueueOperation::parse(&op)?,
            payload: serde_json::from_str(&payload)?,
            idempotency_key,
            retry_count,
            last_error,
            created_at,
        });
    }
    Ok(entries)
}

pub fn pending_count(conn: &Connection) -> DataResult<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Acknowledge a replayed entry.
pub fn mark_applied(conn: &Connection, id: i64) -> DataResult<()> {
    conn.execute(
        "UPDATE sync_queue
         SET status = 'applied', applied_at = datetime('now')
         WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Record a replay failure. The entry stays pending until it has burned
/// `MAX_RETRIES` attempts, then flips to `failed`.
pub fn mark_failed(conn: &Connection, id: i64, error: &str) -> DataResult<()> {
    conn.execute(
        "UPDATE sync_queue
         SET retry_count = retry_count + 1,
             last_error = ?2,
             status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE 'pending' END
         WHERE id = ?1",
        params![id, error, MAX_RETRIES],
    )?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn test_enqueue_and_read_back_in_order() {
        let conn = test_conn();

        enqueue(&conn, "products", QueueOperation::Create, "p-1", &json!({ "_id": "p-1" }))
            .expect("enqueue create");
        enqueue(&conn, "products", QueueOperation::Update, "p-1", &json!({ "_id": "p-1", "x": 1 }))
            .expect("enqueue update");
        enqueue(&conn, "customers", QueueOperation::Delete, "c-9", &json!({ "_id": "c-9" }))
            .expect("enqueue delete");

        let entries = pending(&conn).expect("pending");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].operation, QueueOperation::Create);
        assert_eq!(entries[1].operation, QueueOperation::Update);
        assert_eq!(entries[2].store_name, "customers");
        assert_eq!(entries[2].record_id, "c-9");
        assert_eq!(entries[0].payload, json!({ "_id": "p-1" }));
        assert!(entries[0].id < entries[1].id && entries[1].id < entries[2].id);
    }

    #[test]
    fn test_same_record_same_op_can_queue_twice() {
        let conn = test_conn();
        enqueue(&conn, "products", QueueOperation::Update, "p-1", &json!({ "a": 1 }))
            .expect("first");
        enqueue(&conn, "products", QueueOperation::Update, "p-1", &json!({ "a": 2 }))
            .expect("second update of the same record");
        assert_eq!(pending_count(&conn).expect("count"), 2);
    }

    #[test]
    fn test_mark_applied_removes_from_pending() {
        let conn = test_conn();
        let id = enqueue(&conn, "products", QueueOperation::Create, "p-1", &json!({}))
            .expect("enqueue");
        assert_eq!(pending_count(&conn).expect("count"), 1);

        mark_applied(&conn, id).expect("ack");
        assert_eq!(pending_count(&conn).expect("count"), 0);

        let status: String = conn
            .query_row("SELECT status FROM sync_queue WHERE id = ?1", params![id], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "applied");
    }

    #[test]
    fn test_mark_failed_escalates_at_retry_cap() {
        let conn = test_conn();
        let id = enqueue(&conn, "invoices", QueueOperation::Create, "i-1", &json!({}))
            .expect("enqueue");

        for attempt in 1..MAX_RETRIES {
            mark_failed(&conn, id, "HTTP 503").expect("fail");
            assert_eq!(
                pending_count(&conn).expect("count"),
                1,
                "still pending after attempt {attempt}"
            );
        }

        mark_failed(&conn, id, "HTTP 503").expect("final fail");
        assert_eq!(pending_count(&conn).expect("count"), 0);

        let (status, retries, last_error): (String, i64, String) = conn
            .query_row(
                "SELECT status, retry_count, last_error FROM sync_queue WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("row");
        assert_eq!(status, "failed");
        assert_eq!(retries, MAX_RETRIES);
        assert_eq!(last_error, "HTTP 503");
    }
}
