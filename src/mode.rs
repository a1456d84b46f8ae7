//! Mode detector: decides per call whether operations route to the local
//! store or the remote transport.
//!
//! Two inputs: the operator-set mode (persisted under the
//! `system/operation_mode` setting, values `online`/`offline`) and the live
//! link state fed in by the host application. Offline wins: an explicit
//! offline setting or a down link both route locally. The check is two
//! atomic loads so it can sit on every entity operation.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::db::{self, DbState};
use crate::error::{DataError, DataResult};

/// Settings location of the operator-selected mode. The core only reads it;
/// the host application owns writes.
pub const MODE_SETTING_CATEGORY: &str = "system";
pub const MODE_SETTING_KEY: &str = "operation_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Online,
    Offline,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::Online => "online",
            OperationMode::Offline => "offline",
        }
    }

    /// Anything other than an explicit `offline` counts as online.
    pub fn parse(value: &str) -> OperationMode {
        if value.trim().eq_ignore_ascii_case("offline") {
            OperationMode::Offline
        } else {
            OperationMode::Online
        }
    }
}

/// Live mode signal shared across adapters.
pub struct ModeSignal {
    operator_offline: AtomicBool,
    link_down: AtomicBool,
}

impl ModeSignal {
    pub fn new(mode: OperationMode) -> Self {
        Self {
            operator_offline: AtomicBool::new(mode == OperationMode::Offline),
            link_down: AtomicBool::new(false),
        }
    }

    /// Snapshot the persisted operator mode. The link starts as up; the host
    /// feeds transitions through [`ModeSignal::set_link_up`].
    pub fn from_settings(db: &DbState) -> DataResult<Self> {
        let conn = db
            .conn
            .lock()
            .map_err(|e| DataError::Storage(format!("db lock poisoned: {e}")))?;
        let mode = db::get_setting(&conn, MODE_SETTING_CATEGORY, MODE_SETTING_KEY)
            .map(|v| OperationMode::parse(&v))
            .unwrap_or(OperationMode::Online);
        Ok(Self::new(mode))
    }

    /// True when the operator chose offline or the link is down.
    pub fn is_offline(&self) -> bool {
        self.operator_offline.load(Ordering::Relaxed) || self.link_down.load(Ordering::Relaxed)
    }

    pub fn operator_mode(&self) -> OperationMode {
        if self.operator_offline.load(Ordering::Relaxed) {
            OperationMode::Offline
        } else {
            OperationMode::Online
        }
    }

    pub fn set_operator_mode(&self, mode: OperationMode) {
        self.operator_offline
            .store(mode == OperationMode::Offline, Ordering::Relaxed);
    }

    pub fn set_link_up(&self, up: bool) {
        self.link_down.store(!up, Ordering::Relaxed);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    #[test]
    fn test_parse_defaults_to_online() {
        assert_eq!(OperationMode::parse("offline"), OperationMode::Offline);
        assert_eq!(OperationMode::parse("OFFLINE "), OperationMode::Offline);
        assert_eq!(OperationMode::parse("online"), OperationMode::Online);
        assert_eq!(OperationMode::parse(""), OperationMode::Online);
        assert_eq!(OperationMode::parse("garbage"), OperationMode::Online);
    }

    #[test]
    fn test_offline_when_operator_says_so_or_link_down() {
        let signal = ModeSignal::new(OperationMode::Online);
        assert!(!signal.is_offline());

        signal.set_operator_mode(OperationMode::Offline);
        assert!(signal.is_offline());

        // Link state alone also forces offline
        signal.set_operator_mode(OperationMode::Online);
        signal.set_link_up(false);
        assert!(signal.is_offline());

        signal.set_link_up(true);
        assert!(!signal.is_offline());
    }

    #[test]
    fn test_from_settings_reads_persisted_mode() {
        let conn = Connection::open_in_memory().expect("open db");
        crate::db::run_migrations_for_test(&conn);
        crate::db::set_setting(&conn, MODE_SETTING_CATEGORY, MODE_SETTING_KEY, "offline")
            .expect("persist mode");

        let db = DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        };

        let signal = ModeSignal::from_settings(&db).expect("load signal");
        assert!(signal.is_offline());
        assert_eq!(signal.operator_mode(), OperationMode::Offline);
    }

    #[test]
    fn test_from_settings_defaults_online_when_unset() {
        let conn = Connection::open_in_memory().expect("open db");
        crate::db::run_migrations_for_test(&conn);
        let db = DbState {
            conn: Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        };

        let signal = ModeSignal::from_settings(&db).expect("load signal");
        assert!(!signal.is_offline());
    }
}
