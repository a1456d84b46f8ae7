//! Shared test fixtures: in-memory database state and a mock transport so
//! both modes can be exercised deterministically.

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::adapter::DataService;
use crate::db::{self, DbState};
use crate::error::{DataError, DataResult};
use crate::mode::{ModeSignal, OperationMode};
use crate::store::ID_FIELD;
use crate::transport::RemoteTransport;

pub(crate) fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    db::run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: std::path::PathBuf::from(":memory:"),
    }
}

/// In-memory `RemoteTransport`: collections keyed by path, canned responses
/// for entity-specific endpoints, optional per-path failures, and a call log.
pub(crate) struct MockTransport {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    fetch_responses: Mutex<HashMap<String, Value>>,
    failing_paths: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    id_counter: AtomicU64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            fetch_responses: Mutex::new(HashMap::new()),
            failing_paths: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            id_counter: AtomicU64::new(0),
        }
    }

    pub fn seed_collection(&self, path: &str, records: Vec<Value>) {
        self.collections
            .lock()
            .unwrap()
            .insert(path.to_string(), records);
    }

    pub fn seed_fetch(&self, path: &str, response: Value) {
        self.fetch_responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().unwrap().insert(path.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, method: &str, path: &str) {
        self.calls.lock().unwrap().push(format!("{method} {path}"));
    }

    fn check_failure(&self, path: &str) -> DataResult<()> {
        if self.failing_paths.lock().unwrap().contains(path) {
            return Err(DataError::Transport {
                status: Some(500),
                message: format!("ERP backend server error (HTTP 500) on {path}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn list(&self, path: &str) -> DataResult<Vec<Value>> {
        self.log("GET", path);
        self.check_failure(path)?;
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn get(&self, path: &str, id: &str) -> DataResult<Value> {
        self.log("GET", &format!("{path}/{id}"));
        self.check_failure(path)?;
        self.collections
            .lock()
            .unwrap()
            .get(path)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.get(ID_FIELD).and_then(Value::as_str) == Some(id))
            })
            .cloned()
            .ok_or_else(|| DataError::not_found(path.trim_start_matches('/'), id))
    }

    async fn create(&self, path: &str, body: &Value) -> DataResult<Value> {
        self.log("POST", path);
        self.check_failure(path)?;
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = body.clone();
        if let Some(obj) = record.as_object_mut() {
            obj.insert(ID_FIELD.to_string(), Value::String(format!("srv-{n}")));
        }
        self.collections
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, path: &str, id: &str, body: &Value) -> DataResult<Value> {
        self.log("PUT", &format!("{path}/{id}"));
        self.check_failure(path)?;
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(path.to_string()).or_default();
        let Some(existing) = records
            .iter_mut()
            .find(|r| r.get(ID_FIELD).and_then(Value::as_str) == Some(id))
        else {
            return Err(DataError::not_found(path.trim_start_matches('/'), id));
        };
        if let (Some(target), Some(patch)) = (existing.as_object_mut(), body.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
            target.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        Ok(existing.clone())
    }

    async fn delete(&self, path: &str, id: &str) -> DataResult<Value> {
        self.log("DELETE", &format!("{path}/{id}"));
        self.check_failure(path)?;
        let mut collections = self.collections.lock().unwrap();
        let records = collections.entry(path.to_string()).or_default();
        let before = records.len();
        records.retain(|r| r.get(ID_FIELD).and_then(Value::as_str) != Some(id));
        if records.len() == before {
            return Err(DataError::not_found(path.trim_start_matches('/'), id));
        }
        Ok(Value::Null)
    }

    async fn fetch(&self, path: &str) -> DataResult<Value> {
        self.log("GET", path);
        self.check_failure(path)?;
        self.fetch_responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(DataError::Transport {
                status: Some(404),
                message: "ERP backend endpoint not found".to_string(),
            })
    }
}

/// Service wired to a fresh in-memory database and a mock transport.
pub(crate) fn test_service(mode: OperationMode) -> (DataService, Arc<MockTransport>) {
    let db = Arc::new(test_db_state());
    let transport = Arc::new(MockTransport::new());
    let signal = Arc::new(ModeSignal::new(mode));
    let dyn_transport: Arc<dyn RemoteTransport> = transport.clone();
    let service = DataService::new(db, dyn_transport, signal);
    (service, transport)
}
