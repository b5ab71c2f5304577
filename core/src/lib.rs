//! Shared domain model for the simbroker paper trading core.
//!
//! This crate defines the fundamental types used throughout the simulator:
//! accounts, orders, positions, trades, the unified error taxonomy, and the
//! runtime configuration. It carries no I/O and no async code so every other
//! crate in the workspace can depend on it freely.

pub mod config;
pub mod error;
pub mod types;

pub use config::{SimulatorConfig, TradingMode};
pub use error::{TradingError, TradingResult};
pub use types::{
    Account, AccountId, Currency, Order, OrderFilter, OrderId, OrderRequest, OrderSide,
    OrderStatus, OrderType, Position, PositionKey, ProductType, Symbol, Trade, TradeFilter,
    TradeId, Venue,
};
