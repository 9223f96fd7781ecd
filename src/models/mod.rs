//! # Data Layer
//!
//! SQLx models for the durable ledger: orders, order line items, and the
//! authoritative product stock table with its idempotency records.

pub mod order;
pub mod product_stock;

pub use order::{NewOrder, NewOrderLineItem, Order, OrderLineItem};
pub use product_stock::{DecrementOutcome, ProductStock};
