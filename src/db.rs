//! Local SQLite database layer for the Tajer ERP client.
//!
//! Uses rusqlite with WAL mode. One generic `entity_records` table backs
//! every entity store (records are JSON documents keyed by store name and
//! record id), with JSON1 expression indexes for the registered secondary
//! lookups. Also owns the sync queue, the stock-cascade ledger, and the
//! `local_settings` category/key/value store.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::entity::DESCRIPTORS;
use crate::error::{DataError, DataResult};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{app_data_dir}/tajer.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> DataResult<DbState> {
    fs::create_dir_all(app_data_dir)
        .map_err(|e| DataError::Storage(format!("create data dir: {e}")))?;

    let db_path = app_data_dir.join("tajer.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| DataError::Storage(format!("database open failed after retry: {e}")))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> DataResult<Connection> {
    let conn =
        Connection::open(path).map_err(|e| DataError::Storage(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| DataError::Storage(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> DataResult<()> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| DataError::Storage(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings, entity records, and the sync queue.
fn migrate_v1(conn: &Connection) -> DataResult<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- entity_records (one JSON document per record, partitioned by store)
        CREATE TABLE IF NOT EXISTS entity_records (
            store_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            tenant_id TEXT,
            data TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (store_name, record_id)
        );

        -- sync_queue (append-only from the adapters)
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            store_name TEXT NOT NULL,
            record_id TEXT NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('create', 'update', 'delete')),
            payload TEXT NOT NULL,
            idempotency_key TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'applied', 'failed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            applied_at TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_entity_records_store ON entity_records(store_name);
        CREATE INDEX IF NOT EXISTS idx_entity_records_tenant ON entity_records(store_name, tenant_id);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_store ON sync_queue(store_name, record_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        DataError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: JSON1 expression indexes for secondary lookups.
///
/// One partial index per registered `(store, field)` pair so that lookups
/// like product-by-RFID stay cheap without per-entity tables. Generated from
/// the descriptor table so the registry stays the single source of truth.
fn migrate_v2(conn: &Connection) -> DataResult<()> {
    for descriptor in DESCRIPTORS {
        for field in descriptor.indexed_fields {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS idx_{store}_{field}
                     ON entity_records(json_extract(data, '$.{field}'))
                     WHERE store_name = '{store}';",
                store = descriptor.store,
                field = field,
            );
            conn.execute_batch(&sql).map_err(|e| {
                error!("Migration v2 failed on {}.{}: {e}", descriptor.store, field);
                DataError::Storage(format!("migration v2: {e}"))
            })?;
        }
    }

    conn.execute_batch("INSERT INTO schema_version (version) VALUES (2);")
        .map_err(|e| DataError::Storage(format!("migration v2: {e}")))?;

    info!("Applied migration v2 (secondary lookup indexes)");
    Ok(())
}

/// Migration v3: stock-cascade ledger.
///
/// One row per document whose stock cascade has been applied, keyed by the
/// document id, so a retried document create cannot double-apply the delta.
fn migrate_v3(conn: &Connection) -> DataResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS stock_cascades (
            document_id TEXT PRIMARY KEY,
            document_store TEXT NOT NULL,
            applied_at TEXT DEFAULT (datetime('now'))
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        DataError::Storage(format!("migration v3: {e}"))
    })?;

    info!("Applied migration v3 (stock_cascades ledger)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> DataResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| DataError::Storage(format!("set_setting: {e}")))?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_v1_to_latest() {
        let conn = test_db();
        run_migrations(&conn).expect("run_migrations should succeed");

        let tables = table_names(&conn);
        assert!(
            tables.contains(&"local_settings".to_string()),
            "missing local_settings"
        );
        assert!(
            tables.contains(&"entity_records".to_string()),
            "missing entity_records"
        );
        assert!(
            tables.contains(&"sync_queue".to_string()),
            "missing sync_queue"
        );
        assert!(
            tables.contains(&"stock_cascades".to_string()),
            "missing stock_cascades"
        );

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        // Running again should be a no-op (already at latest version)
        run_migrations(&conn).expect("second run should succeed");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .expect("read schema version");
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_secondary_lookup_indexes_created() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .expect("prepare index list");
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query indexes")
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_products_rfidTag".to_string()));
        assert!(indexes.contains(&"idx_products_barcode".to_string()));
        assert!(indexes.contains(&"idx_invoices_invoiceNumber".to_string()));
        assert!(indexes.contains(&"idx_warehouses_code".to_string()));
    }

    #[test]
    fn test_wal_mode_on_file_db() {
        // WAL only works on file-backed databases; in-memory always returns "memory".
        let dir = std::env::temp_dir().join("tajer_core_test_wal");
        let _ = std::fs::create_dir_all(&dir);
        let db_path = dir.join("test_wal.db");

        // Clean up from previous run
        let _ = std::fs::remove_file(&db_path);

        let conn = open_and_configure(&db_path).expect("open temp db");
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("read journal_mode");
        assert_eq!(mode.to_lowercase(), "wal", "journal_mode should be WAL");

        drop(conn);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_settings_roundtrip() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        assert_eq!(get_setting(&conn, "system", "operation_mode"), None);

        set_setting(&conn, "system", "operation_mode", "offline").expect("set");
        assert_eq!(
            get_setting(&conn, "system", "operation_mode"),
            Some("offline".to_string())
        );

        // Upsert overwrites
        set_setting(&conn, "system", "operation_mode", "online").expect("overwrite");
        assert_eq!(
            get_setting(&conn, "system", "operation_mode"),
            Some("online".to_string())
        );
    }

    #[test]
    fn test_sync_queue_idempotency_key_unique() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT INTO sync_queue (store_name, record_id, operation, payload, idempotency_key)
             VALUES ('products', 'p-1', 'create', '{}', 'key-1')",
            [],
        )
        .expect("first insert");

        // Duplicate idempotency_key should fail
        let result = conn.execute(
            "INSERT INTO sync_queue (store_name, record_id, operation, payload, idempotency_key)
             VALUES ('products', 'p-2', 'create', '{}', 'key-1')",
            [],
        );
        assert!(
            result.is_err(),
            "duplicate idempotency_key should be rejected"
        );
    }

    #[test]
    fn test_sync_queue_operation_check_constraint() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let bad = conn.execute(
            "INSERT INTO sync_queue (store_name, record_id, operation, payload, idempotency_key)
             VALUES ('products', 'p-1', 'upsert', '{}', 'key-x')",
            [],
        );
        assert!(bad.is_err(), "invalid operation should be rejected");
    }
}
