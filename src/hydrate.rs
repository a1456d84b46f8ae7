//! Bulk hydration: download every offline-capable collection from the
//! server and replace the local stores, so the client has something to serve
//! once connectivity goes away.
//!
//! Per-collection failures are tolerated: a store that cannot be fetched is
//! reported and skipped, the rest still hydrate. Always-online entities are
//! excluded; their data would be unreachable offline anyway.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::adapter::DataService;
use crate::db;
use crate::entity::EntityKind;
use crate::error::{DataError, DataResult};
use crate::store;

/// Settings location of the last successful hydration timestamp.
const HYDRATE_SETTING_CATEGORY: &str = "sync";
const HYDRATE_SETTING_KEY: &str = "last_hydrated_at";

#[derive(Debug, Serialize)]
pub struct HydrationReport {
    pub downloaded: usize,
    pub total: usize,
    pub failures: Vec<String>,
}

impl DataService {
    /// Pull all offline-capable collections and replace the local stores.
    /// Requires the online mode; there is nothing to download from offline.
    pub async fn hydrate(&self) -> DataResult<HydrationReport> {
        let ctx = self.context();
        if ctx.mode.is_offline() {
            return Err(DataError::UnsupportedOffline {
                store: "local_store",
                operation: "hydrate",
            });
        }

        let kinds: Vec<EntityKind> = EntityKind::offline_capable().collect();
        let total = kinds.len();
        let mut downloaded = 0usize;
        let mut failures = Vec::new();

        for kind in kinds {
            let descriptor = kind.descriptor();
            match ctx.transport.list(descriptor.remote_path).await {
                Ok(records) => {
                    let written = {
                        let conn = ctx.lock_conn()?;
                        store::replace_all(&conn, descriptor.store, &records, ctx.tenant())?
                    };
                    info!(store = descriptor.store, records = written, "store hydrated");
                    downloaded += 1;
                }
                Err(e) => {
                    warn!(store = descriptor.store, error = %e, "hydration skipped for store");
                    failures.push(format!("{}: {e}", descriptor.store));
                }
            }
        }

        {
            let conn = ctx.lock_conn()?;
            db::set_setting(
                &conn,
                HYDRATE_SETTING_CATEGORY,
                HYDRATE_SETTING_KEY,
                &Utc::now().to_rfc3339(),
            )?;
        }

        info!(downloaded, total, failed = failures.len(), "hydration finished");
        Ok(HydrationReport {
            downloaded,
            total,
            failures,
        })
    }

    /// Timestamp of the last hydration run, if any.
    pub fn last_hydrated_at(&self) -> DataResult<Option<String>> {
        let conn = self.context().lock_conn()?;
        Ok(db::get_setting(
            &conn,
            HYDRATE_SETTING_CATEGORY,
            HYDRATE_SETTING_KEY,
        ))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
