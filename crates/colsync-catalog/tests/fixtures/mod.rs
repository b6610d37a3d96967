//! Test fixtures for warehouse adapter integration tests
//!
//! Reusable schemas and catalog rows representing a small governed
//! warehouse: a documented customers table and a partly documented orders
//! table.

#![allow(dead_code)]

use colsync_core::{Column, ColumnMode, MetadataRecord, Schema};

/// Customers table with every column documented
pub fn customers_schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("customer_id", "INT64")
            .with_mode(ColumnMode::Required)
            .with_description("Surrogate key"),
        Column::new("email", "STRING")
            .with_mode(ColumnMode::Required)
            .with_description("Primary contact address"),
        Column::new("is_active", "BOOL")
            .with_mode(ColumnMode::Required)
            .with_description("Active flag"),
    ])
}

/// Orders table with no descriptions yet
pub fn orders_schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("order_id", "INT64").with_mode(ColumnMode::Required),
        Column::new("Customer_ID", "INT64").with_mode(ColumnMode::Required),
        Column::new("total_amount", "NUMERIC"),
        Column::new("tags", "STRING").with_mode(ColumnMode::Repeated),
    ])
}

/// Catalog rows for both tables
pub fn catalog_rows() -> Vec<MetadataRecord> {
    vec![
        MetadataRecord::new("sales", "customers", "customer_id", "Surrogate key"),
        MetadataRecord::new("sales", "customers", "is_active", "  Active flag "),
        MetadataRecord::new("sales", "orders", "order_id", "Order number"),
        MetadataRecord::new("sales", "orders", "customer_id", "Buyer"),
    ]
}
