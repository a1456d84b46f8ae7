//! Stock mutation cascade.
//!
//! Creating an invoice or purchase offline adjusts the referenced products'
//! stock directly in the local store, mirroring what the server does when
//! online. Product writes here bypass the sync queue; they ride along with
//! the document that caused them. A ledger row keyed by the document id
//! makes the cascade idempotent, so a retried create applies the delta once.

use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use crate::entity::StockEffect;
use crate::error::DataResult;
use crate::store;
use crate::{value_f64, value_str};

const PRODUCTS_STORE: &str = "products";

/// Apply the stock deltas for `document`'s line items.
///
/// Lines referencing products that are missing locally are skipped without
/// failing the document; inventory is best-effort offline and corrected at
/// reconciliation. Returns the number of lines that adjusted stock.
pub(crate) fn apply(
    conn: &Connection,
    document_store: &str,
    document_id: &str,
    document: &Value,
    effect: StockEffect,
) -> DataResult<u32> {
    let already_applied: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stock_cascades WHERE document_id = ?1",
        params![document_id],
        |row| row.get(0),
    )?;
    if already_applied > 0 {
        debug!(document_id, "stock cascade already applied, skipping");
        return Ok(0);
    }

    let mut adjusted = 0u32;
    if let Some(items) = document.get("items").and_then(Value::as_array) {
        for line in items {
            let Some(product_id) = value_str(line, &["productId", "product_id"]) else {
                continue;
            };
            let quantity = value_f64(line, &["quantity", "qty"]).unwrap_or(0.0);
            if quantity <= 0.0 {
                continue;
            }

            let Some(mut product) = store::get_by_id(conn, PRODUCTS_STORE, &product_id)? else {
                debug!(
                    document_id,
                    product_id = %product_id,
                    "product missing locally, line skipped"
                );
                continue;
            };

            let stock = value_f64(&product, &["stock"]).unwrap_or(0.0);
            let new_stock = match effect {
                StockEffect::Deduct => stock - quantity,
                StockEffect::Restock => stock + quantity,
            };

            let Some(obj) = product.as_object_mut() else {
                continue;
            };
            obj.insert("stock".to_string(), Value::from(new_stock));

            let tenant = value_str(&product, &[store::TENANT_FIELD]);
            store::upsert(conn, PRODUCTS_STORE, &product_id, &product, tenant.as_deref())?;
            adjusted += 1;
        }
    }

    conn.execute(
        "INSERT INTO stock_cascades (document_id, document_store) VALUES (?1, ?2)",
        params![document_id, document_store],
    )?;

    debug!(
        document_store,
        document_id, adjusted, "stock cascade applied"
    );
    Ok(adjusted)
}

// ===========================================================================
// Tests
// ===========================================================================
