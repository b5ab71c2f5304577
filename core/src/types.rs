//! Core trading types for the simulated brokerage.
//!
//! This module defines the record sets the ledger persists (accounts, orders,
//! positions, trades) together with the enumerations that drive the matching
//! engine's state machine.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{TradingError, TradingResult};

/// Unique identifier for orders
pub type OrderId = Uuid;
/// Unique identifier for trade (fill) records
pub type TradeId = Uuid;

/// Trading symbols and identifiers
pub type Symbol = String;
pub type Venue = String;
pub type AccountId = String;

/// Fixed set of account currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Inr,
    Usd,
    Eur,
    Gbp,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Inr => "INR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        };
        f.write_str(code)
    }
}

/// Product type of an order. Affects reporting and position bucketing only,
/// never matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProductType {
    /// Intraday position, squared off the same session
    Intraday,

    /// Cash-and-carry delivery
    #[default]
    Delivery,

    /// Carry-forward (overnight derivative) position
    CarryForward,
}

/// Supported order kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at the current market price
    Market,

    /// Execute only at the limit price or better
    Limit,

    /// Stop order that becomes a resident limit order once triggered
    StopLimit,

    /// Stop order that executes at market price once triggered
    StopMarket,
}

impl OrderType {
    /// Returns true if the order kind requires a limit price
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    /// Returns true if the order kind requires a trigger price
    pub fn requires_trigger_price(&self) -> bool {
        matches!(self, OrderType::StopLimit | OrderType::StopMarket)
    }
}

/// Buy or sell side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Sign applied to quantities when mutating a position
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => -Decimal::ONE,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

/// Current status of an order in the lifecycle state machine.
///
/// `Filled`, `Cancelled` and `Rejected` are terminal. An order reaches
/// exactly one terminal status or remains durably `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting, awaiting a price condition
    Pending,

    /// Some quantity filled, remainder still resting
    PartiallyFilled,

    /// Completely filled
    Filled,

    /// Cancelled by the caller
    Cancelled,

    /// Rejected by the engine
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order can still fill or be cancelled
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

/// Parameters for a new order submission.
///
/// Validated before any ledger interaction; an invalid request is never
/// persisted as an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub venue: Venue,
    pub side: OrderSide,
    pub product: ProductType,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
}

impl OrderRequest {
    /// Validates the request parameters
    pub fn validate(&self) -> TradingResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(TradingError::Validation("Symbol must not be empty".into()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(TradingError::Validation(
                "Order quantity must be positive".into(),
            ));
        }
        if self.order_type.requires_limit_price() {
            match self.limit_price {
                Some(price) if price > Decimal::ZERO => {}
                Some(_) => {
                    return Err(TradingError::Validation(
                        "Limit price must be positive".into(),
                    ))
                }
                None => {
                    return Err(TradingError::Validation(format!(
                        "{:?} orders require a limit price",
                        self.order_type
                    )))
                }
            }
        }
        if self.order_type.requires_trigger_price() {
            match self.trigger_price {
                Some(price) if price > Decimal::ZERO => {}
                Some(_) => {
                    return Err(TradingError::Validation(
                        "Trigger price must be positive".into(),
                    ))
                }
                None => {
                    return Err(TradingError::Validation(format!(
                        "{:?} orders require a trigger price",
                        self.order_type
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Core order structure representing a simulated order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub id: OrderId,

    /// Owning account
    pub account_id: AccountId,

    pub symbol: Symbol,
    pub venue: Venue,
    pub side: OrderSide,
    pub product: ProductType,
    pub order_type: OrderType,

    /// Requested quantity
    pub quantity: Decimal,

    /// Limit price, required for Limit and StopLimit orders
    pub limit_price: Option<Decimal>,

    /// Trigger price, required for StopLimit and StopMarket orders
    pub trigger_price: Option<Decimal>,

    /// Current order status
    pub status: OrderStatus,

    /// Quantity filled so far, monotonically non-decreasing
    pub filled_quantity: Decimal,

    /// Quantity-weighted average fill price across all fills
    pub average_fill_price: Option<Decimal>,

    /// True once a StopLimit order's trigger has fired and the order rests
    /// as a plain limit order
    pub triggered: bool,

    /// Populated when the order transitions to Rejected
    pub rejection_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a new pending order from a validated request
    pub fn new(account_id: AccountId, request: OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            symbol: request.symbol,
            venue: request.venue,
            side: request.side,
            product: request.product,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            trigger_price: request.trigger_price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            triggered: false,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
        }
    }

    /// Quantity still awaiting a fill
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// Returns true if the order can still fill or be cancelled
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Position bucket this order settles into
    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            account_id: self.account_id.clone(),
            symbol: self.symbol.clone(),
            venue: self.venue.clone(),
            product: self.product,
        }
    }
}

/// Filter for order queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    /// Restrict to a single status
    pub status: Option<OrderStatus>,

    /// Restrict to a single symbol
    pub symbol: Option<Symbol>,
}

impl OrderFilter {
    /// Returns true if the order passes the filter
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(status) = self.status {
            if order.status != status {
                return false;
            }
        }
        if let Some(symbol) = &self.symbol {
            if &order.symbol != symbol {
                return false;
            }
        }
        true
    }
}

/// Filter for trade history queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFilter {
    /// Restrict to a single symbol
    pub symbol: Option<Symbol>,

    /// Restrict to the fills of one order
    pub order_id: Option<OrderId>,
}

impl TradeFilter {
    /// Returns true if the trade passes the filter
    pub fn matches(&self, trade: &Trade) -> bool {
        if let Some(symbol) = &self.symbol {
            if &trade.symbol != symbol {
                return false;
            }
        }
        if let Some(order_id) = self.order_id {
            if trade.order_id != order_id {
                return false;
            }
        }
        true
    }
}

/// Paper trading account, one per user identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub currency: Currency,

    /// Balance the account was opened (or last reset) with
    pub initial_balance: Decimal,

    /// Cash balance, mutated only by fill application and reset
    pub current_balance: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates a new account with the given opening balance
    pub fn new(account_id: AccountId, initial_balance: Decimal, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            currency,
            initial_balance,
            current_balance: initial_balance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Key uniquely identifying a position row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub venue: Venue,
    pub product: ProductType,
}

/// Net holdings in one instrument for one account and product.
///
/// Net quantity is signed: positive is long, negative is short. The average
/// entry price is zero whenever the net quantity is zero. Unrealized P&L is
/// computed on read against a current price, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub venue: Venue,
    pub product: ProductType,

    /// Signed net quantity
    pub quantity: Decimal,

    /// Quantity-weighted average entry price
    pub average_price: Decimal,

    /// P&L locked in by closing fills, accumulated
    pub realized_pnl: Decimal,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Creates an empty position for the given key
    pub fn new(key: PositionKey) -> Self {
        let now = Utc::now();
        Self {
            account_id: key.account_id,
            symbol: key.symbol,
            venue: key.venue,
            product: key.product,
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// The key this position is stored under
    pub fn key(&self) -> PositionKey {
        PositionKey {
            account_id: self.account_id.clone(),
            symbol: self.symbol.clone(),
            venue: self.venue.clone(),
            product: self.product,
        }
    }

    /// Applies a fill to the position and returns the realized P&L delta.
    ///
    /// Same-direction fills recompute the quantity-weighted average entry
    /// price. Reducing fills realize `closed × (price − avg) × sign(old)`
    /// and keep the old average; a reversal opens the remainder in the
    /// opposite direction at the fill price.
    pub fn apply_fill(&mut self, side: OrderSide, quantity: Decimal, price: Decimal) -> Decimal {
        let signed = side.sign() * quantity;
        let old_quantity = self.quantity;
        let new_quantity = old_quantity + signed;
        let mut realized = Decimal::ZERO;

        if old_quantity.is_zero() || old_quantity.signum() == signed.signum() {
            let total_cost = self.average_price * old_quantity.abs() + price * quantity;
            let total_quantity = old_quantity.abs() + quantity;
            self.average_price = total_cost / total_quantity;
        } else {
            let closed = old_quantity.abs().min(quantity);
            realized = closed * (price - self.average_price) * old_quantity.signum();

            if new_quantity.is_zero() {
                self.average_price = Decimal::ZERO;
            } else if old_quantity.signum() != new_quantity.signum() {
                self.average_price = price;
            }
        }

        self.quantity = new_quantity;
        self.realized_pnl += realized;
        self.updated_at = Utc::now();
        realized
    }

    /// Unrealized P&L of the open quantity marked to `current_price`
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        (current_price - self.average_price) * self.quantity
    }

    /// Returns true if the position holds no net quantity
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }
}

/// Immutable fill record, appended exactly once per matching event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub venue: Venue,
    pub side: OrderSide,
    pub product: ProductType,
    pub quantity: Decimal,
    pub price: Decimal,

    /// Gross value, quantity × price
    pub value: Decimal,

    pub executed_at: DateTime<Utc>,
}

impl Trade {
    /// Creates a trade record for a fill of the given order
    pub fn new(order: &Order, quantity: Decimal, price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            venue: order.venue.clone(),
            side: order.side,
            product: order.product,
            quantity,
            price,
            value: quantity * price,
            executed_at: Utc::now(),
        }
    }
}
