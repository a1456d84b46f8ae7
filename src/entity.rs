//! Entity type registry.
//!
//! One static descriptor per business entity drives the whole adapter layer:
//! local store name, remote REST path, whether the entity is always-online,
//! which document-number prefix it uses, whether creating one moves product
//! stock, and which record fields carry a secondary index.

/// Direction in which a document create moves the referenced product stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// Invoice lines consume stock.
    Deduct,
    /// Purchase lines replenish stock.
    Restock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Product,
    Customer,
    Supplier,
    Invoice,
    Purchase,
    User,
    Warehouse,
    Expense,
    Account,
    JournalEntry,
    EslDevice,
}

#[derive(Debug)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    /// Local store name, also the table partition key in `entity_records`.
    pub store: &'static str,
    /// Remote collection path, appended to `{base}/api`.
    pub remote_path: &'static str,
    /// Always-online entities bypass the local store in every mode; their
    /// correctness depends on server-side authority.
    pub always_online: bool,
    /// Document-number prefix for offline-created documents (`INV`, `PUR`).
    pub document_prefix: Option<&'static str>,
    /// Record field that carries the document number.
    pub document_number_field: Option<&'static str>,
    /// Stock cascade applied when a document of this kind is created offline.
    pub stock_effect: Option<StockEffect>,
    /// Fields with a secondary index in the local store (exact match only).
    pub indexed_fields: &'static [&'static str],
}

/// Descriptor table, in `EntityKind` discriminant order.
pub const DESCRIPTORS: &[EntityDescriptor] = &[
    EntityDescriptor {
        kind: EntityKind::Product,
        store: "products",
        remote_path: "/products",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &["rfidTag", "barcode", "sku", "name"],
    },
    EntityDescriptor {
        kind: EntityKind::Customer,
        store: "customers",
        remote_path: "/customers",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &["phone", "name"],
    },
    EntityDescriptor {
        kind: EntityKind::Supplier,
        store: "suppliers",
        remote_path: "/suppliers",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &["phone", "name"],
    },
    EntityDescriptor {
        kind: EntityKind::Invoice,
        store: "invoices",
        remote_path: "/invoices",
        always_online: false,
        document_prefix: Some("INV"),
        document_number_field: Some("invoiceNumber"),
        stock_effect: Some(StockEffect::Deduct),
        indexed_fields: &["invoiceNumber", "customerId", "status"],
    },
    EntityDescriptor {
        kind: EntityKind::Purchase,
        store: "purchases",
        remote_path: "/purchases",
        always_online: false,
        document_prefix: Some("PUR"),
        document_number_field: Some("purchaseNumber"),
        stock_effect: Some(StockEffect::Restock),
        indexed_fields: &["purchaseNumber", "supplierId"],
    },
    EntityDescriptor {
        kind: EntityKind::User,
        store: "users",
        remote_path: "/users",
        // Credentials and role assignments cannot be faked locally.
        always_online: true,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &["username", "role"],
    },
    EntityDescriptor {
        kind: EntityKind::Warehouse,
        store: "warehouses",
        remote_path: "/warehouses",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &["code"],
    },
    EntityDescriptor {
        kind: EntityKind::Expense,
        store: "expenses",
        remote_path: "/accounting/expenses",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &[],
    },
    EntityDescriptor {
        kind: EntityKind::Account,
        store: "accounts",
        remote_path: "/accounting/accounts",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &[],
    },
    EntityDescriptor {
        kind: EntityKind::JournalEntry,
        store: "journal_entries",
        remote_path: "/accounting/journal-entries",
        always_online: false,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &[],
    },
    EntityDescriptor {
        kind: EntityKind::EslDevice,
        store: "esl_devices",
        remote_path: "/esl/devices",
        // Device telemetry and price pushes go through the server.
        always_online: true,
        document_prefix: None,
        document_number_field: None,
        stock_effect: None,
        indexed_fields: &[],
    },
];

impl EntityKind {
    pub fn descriptor(self) -> &'static EntityDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn from_store(store: &str) -> Option<EntityKind> {
        DESCRIPTORS.iter().find(|d| d.store == store).map(|d| d.kind)
    }

    /// Kinds that participate in offline hydration and local routing.
    pub fn offline_capable() -> impl Iterator<Item = EntityKind> {
        DESCRIPTORS
            .iter()
            .filter(|d| !d.always_online)
            .map(|d| d.kind)
    }
}

/// Whether `field` has a registered secondary index on `store`.
pub(crate) fn is_indexed_field(store: &str, field: &str) -> bool {
    DESCRIPTORS
        .iter()
        .any(|d| d.store == store && d.indexed_fields.contains(&field))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_matches_kind_order() {
        for (i, descriptor) in DESCRIPTORS.iter().enumerate() {
            assert_eq!(
                descriptor.kind as usize, i,
                "descriptor for {:?} out of order",
                descriptor.kind
            );
            assert_eq!(descriptor.kind.descriptor().store, descriptor.store);
        }
    }

    #[test]
    fn test_from_store_roundtrip() {
        for descriptor in DESCRIPTORS {
            assert_eq!(EntityKind::from_store(descriptor.store), Some(descriptor.kind));
        }
        assert_eq!(EntityKind::from_store("no_such_store"), None);
    }

    #[test]
    fn test_always_online_entities() {
        assert!(EntityKind::User.descriptor().always_online);
        assert!(EntityKind::EslDevice.descriptor().always_online);
        assert!(!EntityKind::Product.descriptor().always_online);
        assert!(EntityKind::offline_capable().all(|k| !k.descriptor().always_online));
    }

    #[test]
    fn test_document_prefixes_are_distinct() {
        let prefixes: Vec<_> = DESCRIPTORS
            .iter()
            .filter_map(|d| d.document_prefix)
            .collect();
        assert_eq!(prefixes.len(), 2);
        assert_ne!(prefixes[0], prefixes[1]);
    }

    #[test]
    fn test_indexed_field_registry() {
        assert!(is_indexed_field("products", "rfidTag"));
        assert!(is_indexed_field("products", "barcode"));
        assert!(is_indexed_field("warehouses", "code"));
        assert!(!is_indexed_field("products", "price"));
        assert!(!is_indexed_field("expenses", "amount"));
    }
}
