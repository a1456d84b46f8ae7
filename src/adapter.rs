//! Entity adapters.
//!
//! One uniform interface per entity type (`get_all`, `get_by_id`, `create`,
//! `update`, `delete`), indistinguishable to callers regardless of mode.
//! The branch logic is written once and driven by the static descriptor
//! table; the context is an explicit capability object so tests can exercise
//! both modes without process-wide state.
//!
//! Offline document creation (invoice/purchase) is one logical unit: the
//! record insert, the sync-queue append, and the stock cascade commit in a
//! single SQLite transaction, so a failure cannot leave the document
//! persisted without its cascade or vice versa.

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::{Arc, MutexGuard};
use tracing::{debug, info};

use crate::cascade;
use crate::db::DbState;
use crate::entity::{EntityDescriptor, EntityKind};
use crate::error::{DataError, DataResult};
use crate::ids;
use crate::mode::ModeSignal;
use crate::queue::{self, QueueOperation};
use crate::store::{self, ID_FIELD, TENANT_FIELD};
use crate::transport::RemoteTransport;
use crate::value_f64;

/// Products with no explicit `minStock` are low once stock drops below this.
pub const DEFAULT_LOW_STOCK_THRESHOLD: f64 = 10.0;

/// Capability object carried by every adapter call: database handle, remote
/// transport, mode signal, and the active tenant scope.
pub struct AdapterContext {
    pub db: Arc<DbState>,
    pub transport: Arc<dyn RemoteTransport>,
    pub mode: Arc<ModeSignal>,
    pub tenant_id: Option<String>,
}

impl AdapterContext {
    pub(crate) fn lock_conn(&self) -> DataResult<MutexGuard<'_, Connection>> {
        self.db
            .conn
            .lock()
            .map_err(|e| DataError::Storage(format!("db lock poisoned: {e}")))
    }

    pub(crate) fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }
}

/// Facade over the adapter layer. UI code goes through this and never
/// touches the local store or the sync queue directly.
pub struct DataService {
    ctx: Arc<AdapterContext>,
}

impl DataService {
    pub fn new(db: Arc<DbState>, transport: Arc<dyn RemoteTransport>, mode: Arc<ModeSignal>) -> Self {
        Self {
            ctx: Arc::new(AdapterContext {
                db,
                transport,
                mode,
                tenant_id: None,
            }),
        }
    }

    /// Scope all local reads and writes to one tenant.
    pub fn with_tenant(self, tenant_id: impl Into<String>) -> Self {
        Self {
            ctx: Arc::new(AdapterContext {
                db: self.ctx.db.clone(),
                transport: self.ctx.transport.clone(),
                mode: self.ctx.mode.clone(),
                tenant_id: Some(tenant_id.into()),
            }),
        }
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub fn adapter(&self, kind: EntityKind) -> EntityAdapter {
        EntityAdapter {
            descriptor: kind.descriptor(),
            ctx: self.ctx.clone(),
        }
    }

    pub fn products(&self) -> EntityAdapter {
        self.adapter(EntityKind::Product)
    }

    pub fn customers(&self) -> EntityAdapter {
        self.adapter(EntityKind::Customer)
    }

    pub fn suppliers(&self) -> EntityAdapter {
        self.adapter(EntityKind::Supplier)
    }

    pub fn invoices(&self) -> EntityAdapter {
        self.adapter(EntityKind::Invoice)
    }

    pub fn purchases(&self) -> EntityAdapter {
        self.adapter(EntityKind::Purchase)
    }

    pub fn users(&self) -> EntityAdapter {
        self.adapter(EntityKind::User)
    }

    pub fn warehouses(&self) -> EntityAdapter {
        self.adapter(EntityKind::Warehouse)
    }

    pub fn expenses(&self) -> EntityAdapter {
        self.adapter(EntityKind::Expense)
    }

    pub fn accounts(&self) -> EntityAdapter {
        self.adapter(EntityKind::Account)
    }

    pub fn journal_entries(&self) -> EntityAdapter {
        self.adapter(EntityKind::JournalEntry)
    }

    pub fn esl_devices(&self) -> EntityAdapter {
        self.adapter(EntityKind::EslDevice)
    }
}

// ---------------------------------------------------------------------------
// Product lookups (mode-aware specialized endpoints)
// ---------------------------------------------------------------------------

impl DataService {
    /// Product carrying this RFID tag, if any. Exact match in both modes.
    pub async fn product_by_rfid(&self, tag: &str) -> DataResult<Option<Value>> {
        self.product_lookup("rfidTag", "/products/rfid", tag).await
    }

    /// Product carrying this barcode, if any.
    pub async fn product_by_barcode(&self, code: &str) -> DataResult<Option<Value>> {
        self.product_lookup("barcode", "/products/barcode", code)
            .await
    }

    async fn product_lookup(
        &self,
        field: &'static str,
        remote_prefix: &str,
        value: &str,
    ) -> DataResult<Option<Value>> {
        if self.ctx.mode.is_offline() {
            let conn = self.ctx.lock_conn()?;
            let mut hits = store::get_by_field(&conn, "products", field, value)?;
            if hits.is_empty() {
                return Ok(None);
            }
            return Ok(Some(hits.remove(0)));
        }

        match self
            .ctx
            .transport
            .fetch(&format!("{remote_prefix}/{value}"))
            .await
        {
            Ok(Value::Null) => Ok(None),
            Ok(found) => Ok(Some(found)),
            Err(DataError::Transport {
                status: Some(404), ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Products whose stock sits below their threshold.
    pub async fn low_stock_products(&self) -> DataResult<Vec<Value>> {
        if self.ctx.mode.is_offline() {
            let conn = self.ctx.lock_conn()?;
            let products = store::get_all(&conn, "products", self.ctx.tenant())?;
            return Ok(products.into_iter().filter(is_low_stock).collect());
        }
        self.ctx.transport.list("/products/search/low-stock").await
    }
}

pub(crate) fn is_low_stock(product: &Value) -> bool {
    let stock = value_f64(product, &["stock"]).unwrap_or(0.0);
    let threshold =
        value_f64(product, &["minStock", "min_stock"]).unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    stock < threshold
}

// ---------------------------------------------------------------------------
// Entity adapter
// ---------------------------------------------------------------------------

pub struct EntityAdapter {
    descriptor: &'static EntityDescriptor,
    ctx: Arc<AdapterContext>,
}

impl EntityAdapter {
    pub fn kind(&self) -> EntityKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    /// Whether this call is served locally. Always-online entities refuse
    /// offline routing outright instead of silently degrading.
    fn route_offline(&self, operation: &'static str) -> DataResult<bool> {
        if !self.ctx.mode.is_offline() {
            return Ok(false);
        }
        if self.descriptor.always_online {
            return Err(DataError::UnsupportedOffline {
                store: self.descriptor.store,
                operation,
            });
        }
        Ok(true)
    }

    /// All records of this entity. An empty store is an empty list, never an
    /// error.
    pub async fn get_all(&self) -> DataResult<Vec<Value>> {
        if self.route_offline("get_all")? {
            let conn = self.ctx.lock_conn()?;
            return store::get_all(&conn, self.descriptor.store, self.ctx.tenant());
        }
        self.ctx.transport.list(self.descriptor.remote_path).await
    }

    pub async fn get_by_id(&self, id: &str) -> DataResult<Value> {
        if self.route_offline("get_by_id")? {
            let conn = self.ctx.lock_conn()?;
            return store::get_by_id(&conn, self.descriptor.store, id)?
                .ok_or_else(|| DataError::not_found(self.descriptor.store, id));
        }
        self.ctx
            .transport
            .get(self.descriptor.remote_path, id)
            .await
    }

    /// Create a record. Online, the server response (with its identifier) is
    /// returned verbatim. Offline, an identifier and document number are
    /// allocated as needed and the mutation is queued.
    pub async fn create(&self, data: Value) -> DataResult<Value> {
        if !self.route_offline("create")? {
            return self
                .ctx
                .transport
                .create(self.descriptor.remote_path, &data)
                .await;
        }
        self.create_local(data)
    }

    /// Merge `patch` into an existing record (shallow field overwrite,
    /// identifier preserved).
    pub async fn update(&self, id: &str, patch: Value) -> DataResult<Value> {
        if !self.route_offline("update")? {
            return self
                .ctx
                .transport
                .update(self.descriptor.remote_path, id, &patch)
                .await;
        }
        self.update_local(id, patch)
    }

    pub async fn delete(&self, id: &str) -> DataResult<Value> {
        if !self.route_offline("delete")? {
            return self
                .ctx
                .transport
                .delete(self.descriptor.remote_path, id)
                .await;
        }
        self.delete_local(id)
    }

    // -- offline paths ------------------------------------------------------

    fn create_local(&self, data: Value) -> DataResult<Value> {
        let Value::Object(mut obj) = data else {
            return Err(DataError::Storage(
                "record payload must be a JSON object".to_string(),
            ));
        };

        let conn = self.ctx.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let existing_id = obj
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let id = match existing_id {
            Some(id) => id,
            None => {
                let id = ids::allocate_record_id();
                obj.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };

        if let (Some(prefix), Some(number_field)) = (
            self.descriptor.document_prefix,
            self.descriptor.document_number_field,
        ) {
            let has_number = obj
                .get(number_field)
                .and_then(Value::as_str)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !has_number {
                let number = ids::next_document_number(&tx, self.descriptor.store, prefix)?;
                obj.insert(number_field.to_string(), Value::String(number));
            }
            if !obj.contains_key("date") {
                obj.insert("date".to_string(), Value::String(Utc::now().to_rfc3339()));
            }
        }

        if !obj.contains_key("createdAt") {
            obj.insert(
                "createdAt".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
        }
        if let Some(tenant) = self.ctx.tenant() {
            obj.entry(TENANT_FIELD.to_string())
                .or_insert_with(|| Value::String(tenant.to_string()));
        }

        let record = Value::Object(obj);
        store::upsert(&tx, self.descriptor.store, &id, &record, self.ctx.tenant())?;
        queue::enqueue(
            &tx,
            self.descriptor.store,
            QueueOperation::Create,
            &id,
            &record,
        )?;
        if let Some(effect) = self.descriptor.stock_effect {
            cascade::apply(&tx, self.descriptor.store, &id, &record, effect)?;
        }
        tx.commit()?;

        info!(
            store = self.descriptor.store,
            id = %id,
            "record created offline and queued for sync"
        );
        Ok(record)
    }

    fn update_local(&self, id: &str, patch: Value) -> DataResult<Value> {
        let Value::Object(patch) = patch else {
            return Err(DataError::Storage(
                "update payload must be a JSON object".to_string(),
            ));
        };

        let conn = self.ctx.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        let existing = store::get_by_id(&tx, self.descriptor.store, id)?
            .ok_or_else(|| DataError::not_found(self.descriptor.store, id))?;
        let Value::Object(mut obj) = existing else {
            return Err(DataError::Storage(format!(
                "stored record {}/{id} is not an object",
                self.descriptor.store
            )));
        };

        for (key, value) in patch {
            obj.insert(key, value);
        }
        obj.insert(ID_FIELD.to_string(), Value::String(id.to_string()));

        let record = Value::Object(obj);
        store::upsert(&tx, self.descriptor.store, id, &record, self.ctx.tenant())?;
        queue::enqueue(
            &tx,
            self.descriptor.store,
            QueueOperation::Update,
            id,
            &record,
        )?;
        tx.commit()?;

        debug!(store = self.descriptor.store, id = %id, "record updated offline");
        Ok(record)
    }

    fn delete_local(&self, id: &str) -> DataResult<Value> {
        let conn = self.ctx.lock_conn()?;
        let tx = conn.unchecked_transaction()?;

        if !store::remove(&tx, self.descriptor.store, id)? {
            return Err(DataError::not_found(self.descriptor.store, id));
        }
        queue::enqueue(
            &tx,
            self.descriptor.store,
            QueueOperation::Delete,
            id,
            &json!({ "_id": id }),
        )?;
        tx.commit()?;

        info!(store = self.descriptor.store, id = %id, "record deleted offline");
        Ok(Value::Null)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
