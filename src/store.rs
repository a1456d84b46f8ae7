//! Local Durable Store operations over `entity_records`.
//!
//! Records are JSON objects keyed by the `_id` field. Writes here never
//! touch the sync queue: queueing is an adapter decision, which is what
//! lets cascade side-effects ride along unqueued.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::warn;

use crate::entity;
use crate::error::{DataError, DataResult};

/// Record identifier field, as issued by the server or the offline allocator.
pub const ID_FIELD: &str = "_id";

/// Record field carrying the owning tenant.
pub const TENANT_FIELD: &str = "tenantId";

/// All records of a store, in insertion order. Tenant-scoped callers see
/// their own records plus unscoped ones (legacy rows without a tenant).
pub(crate) fn get_all(
    conn: &Connection,
    store: &str,
    tenant: Option<&str>,
) -> DataResult<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT data FROM entity_records
         WHERE store_name = ?1
           AND (?2 IS NULL OR tenant_id IS NULL OR tenant_id = ?2)
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![store, tenant], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for raw in rows {
        let raw = raw?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(record) => records.push(record),
            Err(e) => warn!(store, error = %e, "skipping unparseable record"),
        }
    }
    Ok(records)
}

pub(crate) fn get_by_id(conn: &Connection, store: &str, id: &str) -> DataResult<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM entity_records WHERE store_name = ?1 AND record_id = ?2",
            params![store, id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Exact-match lookup on a registered secondary index.
///
/// `field` must appear in the store's descriptor; anything else is rejected
/// so arbitrary field names never reach the SQL text.
pub(crate) fn get_by_field(
    conn: &Connection,
    store: &str,
    field: &str,
    value: &str,
) -> DataResult<Vec<Value>> {
    if !entity::is_indexed_field(store, field) {
        return Err(DataError::Storage(format!(
            "field '{field}' has no index on store '{store}'"
        )));
    }

    let sql = format!(
        "SELECT data FROM entity_records
         WHERE store_name = ?1 AND json_extract(data, '$.{field}') = ?2
         ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![store, value], |row| row.get::<_, String>(0))?;

    let mut records = Vec::new();
    for raw in rows {
        records.push(serde_json::from_str(&raw?)?);
    }
    Ok(records)
}

/// Insert or replace a record. The tenant column is taken from the record's
/// own `tenantId` field when present, falling back to the caller's scope.
pub(crate) fn upsert(
    conn: &Connection,
    store: &str,
    id: &str,
    record: &Value,
    tenant: Option<&str>,
) -> DataResult<()> {
    let tenant = record
        .get(TENANT_FIELD)
        .and_then(Value::as_str)
        .or(tenant);
    conn.execute(
        "INSERT INTO entity_records (store_name, record_id, tenant_id, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(store_name, record_id) DO UPDATE SET
            data = excluded.data,
            tenant_id = excluded.tenant_id,
            updated_at = excluded.updated_at",
        params![store, id, tenant, record.to_string()],
    )?;
    Ok(())
}

/// Remove a record. Returns whether a row existed.
pub(crate) fn remove(conn: &Connection, store: &str, id: &str) -> DataResult<bool> {
    let affected = conn.execute(
        "DELETE FROM entity_records WHERE store_name = ?1 AND record_id = ?2",
        params![store, id],
    )?;
    Ok(affected > 0)
}

pub(crate) fn count(conn: &Connection, store: &str) -> DataResult<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM entity_records WHERE store_name = ?1",
        params![store],
        |row| row.get(0),
    )?;
    Ok(n)
}

/// Replace a store's content with a freshly downloaded collection
/// (tenant-scoped when a tenant is active). Records without an `_id` are
/// skipped. Returns the number of records written.
pub(crate) fn replace_all(
    conn: &Connection,
    store: &str,
    records: &[Value],
    tenant: Option<&str>,
) -> DataResult<usize> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "DELETE FROM entity_records
         WHERE store_name = ?1
           AND (?2 IS NULL OR tenant_id IS NULL OR tenant_id = ?2)",
        params![store, tenant],
    )?;

    let mut written = 0;
    for record in records {
        let Some(id) = record.get(ID_FIELD).and_then(Value::as_str) else {
            warn!(store, "skipping downloaded record without an id");
            continue;
        };
        // Stamp the active tenant on unscoped server records
        let stamped;
        let record = match (record.get(TENANT_FIELD).and_then(Value::as_str), tenant) {
            (None, Some(t)) => {
                let mut clone = record.clone();
                if let Some(obj) = clone.as_object_mut() {
                    obj.insert(TENANT_FIELD.to_string(), Value::String(t.to_string()));
                }
                stamped = clone;
                &stamped
            }
            _ => record,
        };
        upsert(&tx, store, id, record, tenant)?;
        written += 1;
    }

    tx.commit()?;
    Ok(written)
}

// ===========================================================================
// Tests
// ===========================================================================
