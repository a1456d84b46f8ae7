//! Offline identifier and document-number allocation.
//!
//! Records created without server contact get a `local-` prefixed UUID so
//! humans and downstream logic can tell them apart from server-issued ids.
//! Document numbers are per-store sequential with an `OFF` marker; the
//! counter is just the current store size, so two devices can collide;
//! reconciliation resolves that server-side, never assume these are global.

use rusqlite::Connection;
use uuid::Uuid;

use crate::error::DataResult;
use crate::store;

/// Prefix on locally-issued record identifiers.
pub const OFFLINE_ID_PREFIX: &str = "local-";

/// Marker segment in offline-issued document numbers.
pub const OFFLINE_NUMBER_MARKER: &str = "OFF";

/// Allocate a locally-unique record identifier.
pub fn allocate_record_id() -> String {
    format!("{OFFLINE_ID_PREFIX}{}", Uuid::new_v4())
}

/// Whether `id` was issued by the offline allocator.
pub fn is_offline_id(id: &str) -> bool {
    id.starts_with(OFFLINE_ID_PREFIX)
}

/// Whether `number` is an offline-issued document number (`INV-OFF-0001`).
pub fn is_offline_document_number(number: &str) -> bool {
    number.split('-').nth(1) == Some(OFFLINE_NUMBER_MARKER)
}

/// Next document number for a store: `{prefix}-OFF-{count+1:04}`.
pub(crate) fn next_document_number(
    conn: &Connection,
    store_name: &str,
    prefix: &str,
) -> DataResult<String> {
    let next = store::count(conn, store_name)? + 1;
    Ok(format!("{prefix}-{OFFLINE_NUMBER_MARKER}-{next:04}"))
}

// ===========================================================================
// Tests
// ===========================================================================
