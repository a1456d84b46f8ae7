//! Error taxonomy for the data access layer.
//!
//! Failures surface the same way in both modes so UI messaging stays
//! mode-agnostic: a missing record is `NotFound` whether it was absent from
//! the local store or the server answered 404.

use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    /// The operation targeted a record absent from the relevant store/mode.
    #[error("{store}/{id} not found")]
    NotFound { store: String, id: String },

    /// A remote call failed. `status` is set when the server answered at all.
    #[error("{message}")]
    Transport { status: Option<u16>, message: String },

    /// An always-online entity operation was attempted while offline.
    #[error("{store}.{operation} requires a connection to the server")]
    UnsupportedOffline {
        store: &'static str,
        operation: &'static str,
    },

    /// Local store failure (SQLite error, poisoned lock, bad payload shape).
    #[error("local store error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DataError {
    pub fn not_found(store: &str, id: &str) -> Self {
        DataError::NotFound {
            store: store.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(e: rusqlite::Error) -> Self {
        DataError::Storage(e.to_string())
    }
}
