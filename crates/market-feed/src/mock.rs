//! Scriptable in-memory quote source for tests and offline runs.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{FeedError, Quote, QuoteSource};

/// Quote source backed by a mutable symbol → price table.
///
/// Prices can be moved mid-test to drive limit and stop triggers, and the
/// whole source can be switched into a failing state to exercise the stale
/// fallback path.
#[derive(Default)]
pub struct MockQuoteSource {
    prices: DashMap<String, Decimal>,
    failing: AtomicBool,
    calls: AtomicU64,
}

impl MockQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets or moves the price for a symbol
    pub fn set_price(&self, symbol: &str, venue: &str, price: Decimal) {
        self.prices.insert(format!("{symbol}-{venue}"), price);
    }

    /// Forgets a symbol, making further quotes for it fail with
    /// `UnknownSymbol`
    pub fn remove_price(&self, symbol: &str, venue: &str) {
        self.prices.remove(&format!("{symbol}-{venue}"));
    }

    /// When failing, every call returns `SourceUnavailable`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of quote calls received, including failed ones
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn quote(&self, symbol: &str, venue: &str) -> Result<Quote, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FeedError::SourceUnavailable("simulated outage".into()));
        }
        let key = format!("{symbol}-{venue}");
        self.prices
            .get(&key)
            .map(|price| Quote::new(symbol, venue, *price))
            .ok_or(FeedError::UnknownSymbol(key))
    }
}
