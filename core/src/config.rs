//! Runtime configuration for the simulator.
//!
//! Configuration is layered: built-in defaults, an optional TOML file, then
//! `SIMBROKER_*` environment variables. Defaults mirror a retail paper
//! trading account: 50,000.00 INR opening balance, a 5 second price
//! freshness window and a 1 second evaluation interval.

use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TradingError, TradingResult};
use crate::types::Currency;

/// Which backend the trading facade routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated execution against live prices
    #[default]
    Paper,

    /// Real brokerage connection
    Live,
}

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Backend selected by the facade
    pub mode: TradingMode,

    /// Opening balance for accounts created on first use
    pub default_balance: Decimal,

    /// Currency for accounts created on first use
    pub default_currency: Currency,

    /// Maximum age of a cached price before a fresh fetch is required
    pub price_ttl_ms: u64,

    /// Bound on a single quote-source call; a timeout is treated as a
    /// source failure
    pub quote_timeout_ms: u64,

    /// Interval between background evaluation passes
    pub evaluation_interval_ms: u64,

    /// Number of accounts evaluated concurrently per pass; evaluation
    /// within one account is always serial
    pub evaluation_concurrency: usize,

    /// Allow SELL orders beyond held quantity. Off by default: a cash
    /// account rejects sells that exceed the position.
    pub allow_short_selling: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Paper,
            default_balance: Decimal::new(50_000_00, 2),
            default_currency: Currency::Inr,
            price_ttl_ms: 5_000,
            quote_timeout_ms: 3_000,
            evaluation_interval_ms: 1_000,
            evaluation_concurrency: 4,
            allow_short_selling: false,
        }
    }
}

impl SimulatorConfig {
    /// Loads configuration from an optional file plus the environment.
    ///
    /// Environment variables use the `SIMBROKER_` prefix, e.g.
    /// `SIMBROKER_DEFAULT_BALANCE=100000`.
    pub fn load(path: Option<&str>) -> TradingResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder
            .add_source(Environment::with_prefix("SIMBROKER"))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| TradingError::Configuration(e.to_string()))
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_millis(self.price_ttl_ms)
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }
}
