use std::fmt;

use serde::{Deserialize, Serialize};

/// SQL column type used when rendering DDL for staging and target tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Rendered as `STRING`.
    Text,
    /// Rendered as `DOUBLE`.
    Double,
    /// Rendered as `INT`.
    Int,
}

impl ColumnType {
    /// Returns the SQL spelling of this type.
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Text => "STRING",
            ColumnType::Double => "DOUBLE",
            ColumnType::Int => "INT",
        }
    }
}

/// One column of an entity's silver table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Column name in the target table.
    pub name: &'static str,
    /// SQL type used in DDL.
    pub column_type: ColumnType,
    /// Whether the column is rewritten when a staged row matches an existing
    /// target row. The primary key and the original capture timestamp are
    /// carried forward instead.
    pub update_on_match: bool,
}

impl ColumnSpec {
    const fn new(name: &'static str, column_type: ColumnType, update_on_match: bool) -> Self {
        Self {
            name,
            column_type,
            update_on_match,
        }
    }
}

/// Static description of one entity kind: where its change batches live, how
/// its target table is keyed and shaped.
///
/// Descriptors drive DDL and MERGE statement generation, so adding an entity
/// kind means adding a variant and a descriptor, not editing SQL templates.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Short name used in storage prefixes and locations ("orders").
    pub short_name: &'static str,
    /// Target table name in the analytical database.
    pub table: &'static str,
    /// Primary key column of the target table.
    pub primary_key: &'static str,
    /// Columns in target table order.
    pub columns: &'static [ColumnSpec],
}

impl EntityDescriptor {
    /// Returns the columns rewritten on a MERGE match.
    pub fn update_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|column| column.update_on_match)
    }
}

const ORDER_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("orderid", ColumnType::Text, false),
    ColumnSpec::new("customerid", ColumnType::Text, true),
    ColumnSpec::new("orderdate", ColumnType::Text, true),
    ColumnSpec::new("totalamount", ColumnType::Double, true),
    ColumnSpec::new("customer_name", ColumnType::Text, true),
    ColumnSpec::new("customer_region", ColumnType::Text, true),
    ColumnSpec::new("event_timestamp", ColumnType::Text, false),
    ColumnSpec::new("processing_timestamp", ColumnType::Text, true),
];

const PRODUCT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("productid", ColumnType::Text, false),
    ColumnSpec::new("name", ColumnType::Text, true),
    ColumnSpec::new("price", ColumnType::Double, true),
    ColumnSpec::new("stocklevel", ColumnType::Int, true),
    ColumnSpec::new("event_timestamp", ColumnType::Text, false),
    ColumnSpec::new("processing_timestamp", ColumnType::Text, true),
];

const CUSTOMER_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("customerid", ColumnType::Text, false),
    ColumnSpec::new("name", ColumnType::Text, true),
    ColumnSpec::new("region", ColumnType::Text, true),
    ColumnSpec::new("event_timestamp", ColumnType::Text, false),
    ColumnSpec::new("processing_timestamp", ColumnType::Text, true),
];

const ORDER_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    short_name: "orders",
    table: "orders_enriched",
    primary_key: "orderid",
    columns: ORDER_COLUMNS,
};

const PRODUCT_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    short_name: "products",
    table: "products_enriched",
    primary_key: "productid",
    columns: PRODUCT_COLUMNS,
};

const CUSTOMER_DESCRIPTOR: EntityDescriptor = EntityDescriptor {
    short_name: "customers",
    table: "customers_enriched",
    primary_key: "customerid",
    columns: CUSTOMER_COLUMNS,
};

/// The closed set of business entities the engine tracks.
///
/// Every per-entity behavior (storage prefix, schema, merge statement, row
/// shaping) is selected by pattern matching on [`EntityKind`] through its
/// [`EntityDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Order,
    Product,
    Customer,
}

impl EntityKind {
    /// All tracked entity kinds, in merge order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Order, EntityKind::Product, EntityKind::Customer];

    /// Returns the static descriptor for this kind.
    pub fn descriptor(&self) -> &'static EntityDescriptor {
        match self {
            EntityKind::Order => &ORDER_DESCRIPTOR,
            EntityKind::Product => &PRODUCT_DESCRIPTOR,
            EntityKind::Customer => &CUSTOMER_DESCRIPTOR,
        }
    }

    /// Resolves a source store table name to an entity kind.
    ///
    /// Source tables are matched by substring, case-insensitively, since the
    /// capture mechanism reports environment-qualified names.
    pub fn from_source_table(source_table: &str) -> Option<EntityKind> {
        let lowered = source_table.to_lowercase();
        if lowered.contains("orders") {
            Some(EntityKind::Order)
        } else if lowered.contains("products") {
            Some(EntityKind::Product)
        } else if lowered.contains("customers") {
            Some(EntityKind::Customer)
        } else {
            None
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().short_name)
    }
}
