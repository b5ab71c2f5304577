//! # Market Feed
//!
//! Quote sourcing for the simulator: the [`QuoteSource`] trait abstracts
//! where prices come from, and [`PriceCache`] fronts a source with a short
//! freshness window so a burst of evaluations against the same symbol costs
//! one upstream call.
//!
//! A source outage degrades gracefully: the cache serves the last known
//! price marked stale rather than failing the read, and only errors when it
//! has never seen the symbol at all.

pub mod cache;
pub mod mock;

pub use cache::{CacheStats, PriceCache};
pub use mock::MockQuoteSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by quote sources and the price cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// The upstream source failed or refused the request
    #[error("Quote source unavailable: {0}")]
    SourceUnavailable(String),

    /// The upstream call exceeded the configured timeout
    #[error("Quote request timed out for {0}")]
    Timeout(String),

    /// The source has no quote for the symbol
    #[error("No quote available for {0}")]
    UnknownSymbol(String),
}

/// A point-in-time price for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub venue: String,

    /// Last traded price
    pub price: Decimal,

    /// When the source produced this price
    pub fetched_at: DateTime<Utc>,

    /// True when the quote was served past its freshness window because the
    /// source could not be reached
    pub stale: bool,
}

impl Quote {
    /// Creates a fresh quote stamped now
    pub fn new(symbol: impl Into<String>, venue: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            venue: venue.into(),
            price,
            fetched_at: Utc::now(),
            stale: false,
        }
    }
}

/// Anything that can produce a current quote for a symbol on a venue
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str, venue: &str) -> Result<Quote, FeedError>;
}
