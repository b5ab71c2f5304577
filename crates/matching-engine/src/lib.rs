//! # Matching Engine
//!
//! Simulated order execution against live prices. [`engine::MatchingEngine`]
//! owns the fill rules for every order kind and evaluates orders both
//! synchronously at submission and from the periodic pass driven by
//! [`monitor::OrderMonitor`]. [`facade`] wraps the engine in the
//! account-facing [`facade::TradingService`] trait and the per-account
//! service registry.

pub mod engine;
pub mod facade;
pub mod monitor;

pub use engine::MatchingEngine;
pub use facade::{
    BalanceView, PaperTradingService, PositionView, ServiceRegistry, TradingService,
};
pub use monitor::OrderMonitor;
