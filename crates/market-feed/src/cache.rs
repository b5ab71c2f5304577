//! TTL price cache in front of a quote source.
//!
//! Keyed by `SYMBOL-VENUE`. A read within the freshness window is a hit and
//! never touches the source. Past the window the cache refetches; when the
//! fetch fails it falls back to the expired entry marked stale, so resting
//! orders keep evaluating through a short feed outage.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{FeedError, Quote, QuoteSource};

/// Cache hit/miss counters, all monotonically increasing
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_serves: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Reads answered from an expired entry because the source was down
    pub fn stale_serves(&self) -> u64 {
        self.stale_serves.load(Ordering::Relaxed)
    }

    /// Reads that failed outright, with no entry to fall back on
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Shared, thread-safe price cache
pub struct PriceCache {
    source: Arc<dyn QuoteSource>,
    ttl: Duration,
    timeout: Duration,
    quotes: DashMap<String, Quote>,
    stats: CacheStats,
}

impl PriceCache {
    /// Wraps a quote source with the given freshness window and per-call
    /// timeout
    pub fn new(source: Arc<dyn QuoteSource>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            source,
            ttl,
            timeout,
            quotes: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    fn key(symbol: &str, venue: &str) -> String {
        format!("{symbol}-{venue}")
    }

    /// Returns a quote for the symbol, from cache when fresh.
    ///
    /// On a source failure the last cached quote is returned with `stale`
    /// set; `Err` means the source failed and nothing was ever cached.
    pub async fn quote(&self, symbol: &str, venue: &str) -> Result<Quote, FeedError> {
        let key = Self::key(symbol, venue);

        if let Some(cached) = self.quotes.get(&key) {
            let age = Utc::now().signed_duration_since(cached.fetched_at);
            if age.to_std().map_or(false, |age| age < self.ttl) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match self.fetch(symbol, venue).await {
            Ok(quote) => {
                debug!(%symbol, %venue, price = %quote.price, "Refreshed quote");
                self.quotes.insert(key, quote.clone());
                Ok(quote)
            }
            Err(e) => {
                if let Some(cached) = self.quotes.get(&key) {
                    warn!(%symbol, %venue, error = %e, "Quote source down, serving stale price");
                    self.stats.stale_serves.fetch_add(1, Ordering::Relaxed);
                    let mut quote = cached.clone();
                    quote.stale = true;
                    return Ok(quote);
                }
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Last traded price only, the shape the matching engine consumes
    pub async fn price(&self, symbol: &str, venue: &str) -> Result<rust_decimal::Decimal, FeedError> {
        self.quote(symbol, venue).await.map(|q| q.price)
    }

    async fn fetch(&self, symbol: &str, venue: &str) -> Result<Quote, FeedError> {
        match tokio::time::timeout(self.timeout, self.source.quote(symbol, venue)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(Self::key(symbol, venue))),
        }
    }

    /// Drops every cached quote
    pub fn clear(&self) {
        self.quotes.clear();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockQuoteSource;
    use rust_decimal_macros::dec;

    fn cache_over(source: Arc<MockQuoteSource>, ttl_ms: u64) -> PriceCache {
        PriceCache::new(
            source,
            Duration::from_millis(ttl_ms),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_a_source_call() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_price("RELIANCE", "NSE", dec!(2500));
        let cache = cache_over(source.clone(), 5_000);

        assert_eq!(cache.price("RELIANCE", "NSE").await.unwrap(), dec!(2500));
        assert_eq!(cache.price("RELIANCE", "NSE").await.unwrap(), dec!(2500));

        assert_eq!(source.calls(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_a_refetch() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_price("RELIANCE", "NSE", dec!(2500));
        let cache = cache_over(source.clone(), 0);

        cache.price("RELIANCE", "NSE").await.unwrap();
        source.set_price("RELIANCE", "NSE", dec!(2510));
        assert_eq!(cache.price("RELIANCE", "NSE").await.unwrap(), dec!(2510));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn source_outage_falls_back_to_stale_quote() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_price("RELIANCE", "NSE", dec!(2500));
        let cache = cache_over(source.clone(), 0);

        let fresh = cache.quote("RELIANCE", "NSE").await.unwrap();
        assert!(!fresh.stale);

        source.set_failing(true);
        let stale = cache.quote("RELIANCE", "NSE").await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.price, dec!(2500));
        assert_eq!(cache.stats().stale_serves(), 1);
    }

    #[tokio::test]
    async fn outage_with_no_history_is_an_error() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_failing(true);
        let cache = cache_over(source, 5_000);

        let err = cache.quote("RELIANCE", "NSE").await.unwrap_err();
        assert!(matches!(err, FeedError::SourceUnavailable(_)));
        assert_eq!(cache.stats().errors(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_is_an_error() {
        let source = Arc::new(MockQuoteSource::new());
        let cache = cache_over(source, 5_000);

        let err = cache.quote("NOSUCH", "NSE").await.unwrap_err();
        assert_eq!(err, FeedError::UnknownSymbol("NOSUCH-NSE".into()));
    }

    #[tokio::test]
    async fn clear_forces_the_next_read_to_the_source() {
        let source = Arc::new(MockQuoteSource::new());
        source.set_price("RELIANCE", "NSE", dec!(2500));
        let cache = cache_over(source.clone(), 60_000);

        cache.price("RELIANCE", "NSE").await.unwrap();
        cache.clear();
        cache.price("RELIANCE", "NSE").await.unwrap();
        assert_eq!(source.calls(), 2);
    }
}
