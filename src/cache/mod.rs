//! # Stock Cache
//!
//! Read-optimized, non-authoritative projection of ledger quantities. The
//! only write rule is `set_if_newer`: an entry is applied when its version is
//! strictly greater than the held one, so out-of-order delivery can make the
//! cache stale but never regress it.

pub mod stock_cache;

pub use stock_cache::{CachedStock, InMemoryStockCache, StockCache};
