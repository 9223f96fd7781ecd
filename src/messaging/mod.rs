//! # Messaging Module
//!
//! PostgreSQL message queue (pgmq) based messaging for the stock pipeline.
//! Durable, at-least-once delivery with visibility-timeout redelivery; two
//! logical topics carry decrement intents and authoritative updates.

pub mod message;
pub mod pgmq_client;

pub use message::*;
pub use pgmq_client::*;
