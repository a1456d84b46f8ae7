//! Offline-first data access core for the Tajer ERP desktop client.
//!
//! Every entity operation (list, get, create, update, delete) behaves the
//! same whether the device can reach the backend or not. Online, calls pass
//! through to the remote REST API. Offline, they run against a local SQLite
//! store, append to a sync queue for later reconciliation, and apply the
//! side effects the server would have applied: creating an invoice or
//! purchase moves the referenced products' stock. Always-online entities
//! (user management, ESL devices) refuse offline routing outright.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tajer_erp_core::{db, DataService, HttpTransport, ModeSignal, RemoteTransport};
//!
//! # fn main() -> tajer_erp_core::DataResult<()> {
//! let db = Arc::new(db::init(std::path::Path::new("/var/lib/tajer"))?);
//! let transport: Arc<dyn RemoteTransport> =
//!     Arc::new(HttpTransport::new("https://erp.tajer.app", None)?);
//! let mode = Arc::new(ModeSignal::from_settings(&db)?);
//! let service = DataService::new(db, transport, mode).with_tenant("t-1");
//! # Ok(())
//! # }
//! ```

use serde_json::Value;

pub mod adapter;
pub mod db;
pub mod entity;
pub mod error;
pub mod hydrate;
pub mod ids;
pub mod mode;
pub mod queue;
pub mod telemetry;
pub mod transport;

mod cascade;
mod reports;
mod store;

#[cfg(test)]
mod testing;

pub use adapter::{AdapterContext, DataService, EntityAdapter};
pub use db::DbState;
pub use entity::{EntityDescriptor, EntityKind, StockEffect};
pub use error::{DataError, DataResult};
pub use hydrate::HydrationReport;
pub use mode::{ModeSignal, OperationMode};
pub use queue::{QueueEntry, QueueOperation};
pub use transport::{HttpTransport, RemoteTransport};

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}
