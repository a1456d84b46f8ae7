//! Mode-aware dashboard and report aggregates.
//!
//! Online these delegate to the server's reporting endpoints; offline they
//! compute the same figures from the local store, so dashboards keep working
//! against the data that was hydrated before connectivity went away.

use chrono::Utc;
use serde_json::{json, Value};

use crate::adapter::{is_low_stock, DataService};
use crate::error::DataResult;
use crate::store;
use crate::{value_f64, value_str};

impl DataService {
    pub async fn dashboard_stats(&self) -> DataResult<Value> {
        let ctx = self.context();
        if !ctx.mode.is_offline() {
            return ctx.transport.fetch("/dashboard/stats").await;
        }

        let conn = ctx.lock_conn()?;
        let tenant = ctx.tenant();
        let products = store::get_all(&conn, "products", tenant)?;
        let customers = store::get_all(&conn, "customers", tenant)?;
        let invoices = store::get_all(&conn, "invoices", tenant)?;
        let purchases = store::get_all(&conn, "purchases", tenant)?;

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let today_sales: f64 = invoices
            .iter()
            .filter(|inv| {
                record_date(inv)
                    .map(|d| d.starts_with(&today))
                    .unwrap_or(false)
            })
            .filter_map(|inv| value_f64(inv, &["total"]))
            .sum();

        Ok(json!({
            "totalProducts": products.len(),
            "totalCustomers": customers.len(),
            "totalInvoices": invoices.len(),
            "totalSales": sum_field(&invoices, &["total"]),
            "totalPurchases": sum_field(&purchases, &["total"]),
            "lowStockCount": products.iter().filter(|p| is_low_stock(p)).count(),
            "todaySales": today_sales,
        }))
    }

    pub async fn inventory_report(&self) -> DataResult<Value> {
        let ctx = self.context();
        if !ctx.mode.is_offline() {
            return ctx.transport.fetch("/reports/inventory").await;
        }

        let conn = ctx.lock_conn()?;
        let products = store::get_all(&conn, "products", ctx.tenant())?;

        let total_stock: f64 = products
            .iter()
            .filter_map(|p| value_f64(p, &["stock"]))
            .sum();
        let total_value: f64 = products
            .iter()
            .map(|p| {
                value_f64(p, &["stock"]).unwrap_or(0.0)
                    * value_f64(p, &["costPrice", "cost_price"]).unwrap_or(0.0)
            })
            .sum();
        let low_stock: Vec<Value> = products
            .iter()
            .filter(|p| is_low_stock(p))
            .cloned()
            .collect();

        Ok(json!({
            "totalProducts": products.len(),
            "totalStock": total_stock,
            "totalValue": total_value,
            "lowStock": low_stock,
            "products": products,
        }))
    }

    /// Sales within an inclusive ISO-8601 date range; open bounds are
    /// accepted on either side.
    pub async fn sales_report(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> DataResult<Value> {
        let ctx = self.context();
        if !ctx.mode.is_offline() {
            let mut path = String::from("/reports/sales");
            let mut sep = '?';
            if let Some(start) = start_date {
                path.push_str(&format!("{sep}startDate={start}"));
                sep = '&';
            }
            if let Some(end) = end_date {
                path.push_str(&format!("{sep}endDate={end}"));
            }
            return ctx.transport.fetch(&path).await;
        }

        let conn = ctx.lock_conn()?;
        let invoices = store::get_all(&conn, "invoices", ctx.tenant())?;
        let filtered: Vec<Value> = invoices
            .into_iter()
            .filter(|inv| in_range(inv, start_date, end_date))
            .collect();

        let total_items: usize = filtered
            .iter()
            .filter_map(|inv| inv.get("items").and_then(Value::as_array))
            .map(Vec::len)
            .sum();

        Ok(json!({
            "totalSales": sum_field(&filtered, &["total"]),
            "totalInvoices": filtered.len(),
            "totalItems": total_items,
            "invoices": filtered,
        }))
    }
}

fn sum_field(records: &[Value], keys: &[&str]) -> f64 {
    records
        .iter()
        .filter_map(|record| value_f64(record, keys))
        .sum()
}

fn record_date(record: &Value) -> Option<String> {
    value_str(record, &["date", "createdAt", "created_at"])
}

/// ISO-8601 strings compare lexicographically, so plain string ordering is
/// enough for range checks.
fn in_range(record: &Value, start: Option<&str>, end: Option<&str>) -> bool {
    let Some(date) = record_date(record) else {
        return start.is_none() && end.is_none();
    };
    if let Some(start) = start {
        if date.as_str() < start {
            return false;
        }
    }
    if let Some(end) = end {
        // End bound is a day: anything on that day is in range
        if date.as_str() > end && !date.starts_with(end) {
            return false;
        }
    }
    true
}

// ===========================================================================
// Tests
// ===========================================================================
