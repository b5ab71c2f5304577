//! Error taxonomy shared across the simulator.
//!
//! Every fallible operation in the workspace resolves to a [`TradingError`].
//! Validation failures are raised before any ledger interaction; funds and
//! holdings failures are persisted on the order as a rejection and surfaced
//! with the amounts needed to display them.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{AccountId, OrderId};

/// Trading-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradingError {
    /// Malformed order parameters, rejected before any ledger interaction
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Insufficient holdings: requested {requested}, held {held}")]
    InsufficientHoldings { requested: Decimal, held: Decimal },

    /// No price could be obtained for the instrument, fresh or stale
    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// A cancel request lost the race against a fill
    #[error("Order {0} already filled")]
    AlreadyFilled(OrderId),

    #[error("Order {0} already cancelled")]
    AlreadyCancelled(OrderId),

    #[error("Order {0} already rejected")]
    AlreadyRejected(OrderId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Type alias for trading results
pub type TradingResult<T> = Result<T, TradingError>;
