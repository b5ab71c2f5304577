//! # Simbroker Ledger
//!
//! In-memory transactional record store for the paper trading simulator:
//! accounts, orders, positions and trades, plus the invariants over them.
//!
//! The store owns the per-account locks that serialize every mutation of one
//! account's ledger. Fill application is the single mutation path: it
//! re-validates funds and holdings, adjusts the balance, upserts the
//! position, appends the trade and updates the order as one unit.

pub mod store;

pub use store::{AccountStatistics, LedgerStore};
