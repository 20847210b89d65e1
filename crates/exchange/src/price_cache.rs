//! Latest price and book snapshots per asset.
//!
//! Writers are the WebSocket reader and the REST pollers; readers are the
//! arbitrage engine and the HTTP surface. Updates carry a monotonic
//! sequence (exchange sequence number, or timestamp when the upstream has
//! none); anything at or below the stored sequence is dropped so an
//! out-of-order delivery can never roll a price back.

use crate::orderbook::NormalizedBook;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
struct AssetState {
    last_price: Option<Decimal>,
    price_sequence: u64,
    book: Option<NormalizedBook>,
    book_sequence: u64,
}

/// Shared price/book cache. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    inner: Arc<RwLock<HashMap<String, AssetState>>>,
}

impl PriceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a price observation. Returns false when `sequence` is not
    /// newer than the stored one (the update is dropped).
    pub fn update_price(&self, asset_id: &str, price: Decimal, sequence: u64) -> bool {
        let mut map = self.inner.write();
        let state = map.entry(asset_id.to_string()).or_default();
        if sequence <= state.price_sequence && state.last_price.is_some() {
            return false;
        }
        state.last_price = Some(price);
        state.price_sequence = sequence;
        true
    }

    /// Stores a book snapshot under the same monotonic rule.
    pub fn update_book(&self, book: NormalizedBook, sequence: u64) -> bool {
        let mut map = self.inner.write();
        let state = map.entry(book.asset_id.clone()).or_default();
        if sequence <= state.book_sequence && state.book.is_some() {
            return false;
        }
        state.book = Some(book);
        state.book_sequence = sequence;
        true
    }

    /// Latest price for an asset.
    #[must_use]
    pub fn price(&self, asset_id: &str) -> Option<Decimal> {
        self.inner.read().get(asset_id)?.last_price
    }

    /// Latest book snapshot for an asset.
    #[must_use]
    pub fn book(&self, asset_id: &str) -> Option<NormalizedBook> {
        self.inner.read().get(asset_id)?.book.clone()
    }

    /// Sequence of the stored book, 0 when absent.
    #[must_use]
    pub fn book_sequence(&self, asset_id: &str) -> u64 {
        self.inner
            .read()
            .get(asset_id)
            .map_or(0, |s| s.book_sequence)
    }

    /// Drops one asset's state (unsubscribe path).
    pub fn evict(&self, asset_id: &str) {
        self.inner.write().remove(asset_id);
    }

    /// Number of tracked assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no asset is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
