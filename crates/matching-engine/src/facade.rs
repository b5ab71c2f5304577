//! Account-facing trading surface.
//!
//! [`TradingService`] is the seam between callers and a backend: the paper
//! implementation routes everything through the matching engine, and the
//! registry hands out one cached service instance per account. Selecting
//! the live mode is accepted by configuration but rejected at service
//! construction until a real brokerage backend exists.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use simbroker_core::{
    Account, AccountId, Currency, Order, OrderFilter, OrderId, OrderRequest, OrderSide,
    OrderType, PositionKey, ProductType, Symbol, Trade, TradeFilter, TradingError, TradingMode,
    TradingResult, Venue,
};
use simbroker_ledger::AccountStatistics;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::MatchingEngine;

/// A position row marked to the current market price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: Symbol,
    pub venue: Venue,
    pub product: ProductType,
    pub quantity: Decimal,
    pub average_price: Decimal,

    /// Current price, absent when the feed has no quote
    pub current_price: Option<Decimal>,

    /// Marked against `current_price`, absent when no quote is available
    pub unrealized_pnl: Option<Decimal>,

    pub realized_pnl: Decimal,
}

/// Account funds summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub account_id: AccountId,
    pub currency: Currency,
    pub initial_balance: Decimal,

    /// Free cash
    pub cash_balance: Decimal,

    /// Opening balance minus free cash; negative once trading has netted a
    /// cash gain
    pub used_balance: Decimal,

    /// Market value of open positions; unpriced positions are valued at
    /// their average entry price
    pub position_value: Decimal,

    /// Cash plus position value
    pub total_equity: Decimal,

    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Everything a caller can do against one trading account
#[async_trait]
pub trait TradingService: Send + Sync {
    async fn place_order(&self, request: OrderRequest) -> TradingResult<Order>;

    async fn cancel_order(&self, order_id: OrderId) -> TradingResult<Order>;

    /// Cancels every pending order; orders that fill concurrently are left
    /// alone
    async fn cancel_all_orders(&self) -> TradingResult<Vec<Order>>;

    async fn orders(&self, filter: OrderFilter) -> TradingResult<Vec<Order>>;

    async fn trades(&self, filter: TradeFilter) -> TradingResult<Vec<Trade>>;

    /// Open positions marked to market
    async fn positions(&self) -> TradingResult<Vec<PositionView>>;

    /// Open delivery-product positions, the holdings view of the account
    async fn holdings(&self) -> TradingResult<Vec<PositionView>>;

    /// Flattens one position with a market order
    async fn close_position(
        &self,
        symbol: &str,
        venue: &str,
        product: ProductType,
    ) -> TradingResult<Order>;

    /// Flattens every open position; a failure on one position is logged
    /// and the rest still close
    async fn close_all_positions(&self) -> TradingResult<Vec<Order>>;

    async fn balance(&self) -> TradingResult<BalanceView>;

    async fn statistics(&self) -> TradingResult<AccountStatistics>;

    /// Wipes orders, positions and trades and restores the opening balance
    async fn reset(&self) -> TradingResult<Account>;
}

impl std::fmt::Debug for dyn TradingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn TradingService")
    }
}

/// Paper trading backend bound to one account
pub struct PaperTradingService {
    engine: Arc<MatchingEngine>,
    account_id: AccountId,
}

impl PaperTradingService {
    /// Binds a service to the account, opening it on first use
    pub fn new(engine: Arc<MatchingEngine>, account_id: impl Into<AccountId>) -> Self {
        let account_id = account_id.into();
        engine.ledger().open_or_get_account(&account_id);
        Self { engine, account_id }
    }
}

#[async_trait]
impl TradingService for PaperTradingService {
    async fn place_order(&self, request: OrderRequest) -> TradingResult<Order> {
        self.engine.submit(&self.account_id, request).await
    }

    async fn cancel_order(&self, order_id: OrderId) -> TradingResult<Order> {
        let order = self.engine.ledger().order(order_id)?;
        if order.account_id != self.account_id {
            return Err(TradingError::OrderNotFound(order_id));
        }
        self.engine.cancel(order_id).await
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn cancel_all_orders(&self) -> TradingResult<Vec<Order>> {
        let pending = self.engine.ledger().pending_orders_for(&self.account_id);
        let mut cancelled = Vec::with_capacity(pending.len());
        for order in pending {
            match self.engine.cancel(order.id).await {
                Ok(order) => cancelled.push(order),
                // Lost the race to a fill or another cancel
                Err(TradingError::AlreadyFilled(_)) | Err(TradingError::AlreadyCancelled(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(count = cancelled.len(), "Cancelled all pending orders");
        Ok(cancelled)
    }

    async fn orders(&self, filter: OrderFilter) -> TradingResult<Vec<Order>> {
        Ok(self.engine.ledger().orders_for(&self.account_id, &filter))
    }

    async fn trades(&self, filter: TradeFilter) -> TradingResult<Vec<Trade>> {
        Ok(self.engine.ledger().trades_for(&self.account_id, &filter))
    }

    async fn positions(&self) -> TradingResult<Vec<PositionView>> {
        let mut views = Vec::new();
        for position in self.engine.ledger().positions_for(&self.account_id) {
            if position.is_flat() {
                continue;
            }
            let current_price = self
                .engine
                .prices()
                .price(&position.symbol, &position.venue)
                .await
                .ok();
            views.push(PositionView {
                symbol: position.symbol.clone(),
                venue: position.venue.clone(),
                product: position.product,
                quantity: position.quantity,
                average_price: position.average_price,
                current_price,
                unrealized_pnl: current_price.map(|p| position.unrealized_pnl(p)),
                realized_pnl: position.realized_pnl,
            });
        }
        Ok(views)
    }

    async fn holdings(&self) -> TradingResult<Vec<PositionView>> {
        let mut holdings = self.positions().await?;
        holdings.retain(|p| p.product == ProductType::Delivery);
        Ok(holdings)
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn close_position(
        &self,
        symbol: &str,
        venue: &str,
        product: ProductType,
    ) -> TradingResult<Order> {
        let key = PositionKey {
            account_id: self.account_id.clone(),
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            product,
        };
        let position = self
            .engine
            .ledger()
            .position(&key)
            .filter(|p| !p.is_flat())
            .ok_or_else(|| {
                TradingError::Validation(format!("No open position in {symbol} on {venue}"))
            })?;

        let side = if position.quantity > Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        self.engine
            .submit(
                &self.account_id,
                OrderRequest {
                    symbol: symbol.to_string(),
                    venue: venue.to_string(),
                    side,
                    product,
                    order_type: OrderType::Market,
                    quantity: position.quantity.abs(),
                    limit_price: None,
                    trigger_price: None,
                },
            )
            .await
    }

    #[instrument(skip(self), fields(account = %self.account_id))]
    async fn close_all_positions(&self) -> TradingResult<Vec<Order>> {
        let mut closed = Vec::new();
        for position in self.engine.ledger().positions_for(&self.account_id) {
            if position.is_flat() {
                continue;
            }
            match self
                .close_position(&position.symbol, &position.venue, position.product)
                .await
            {
                Ok(order) => closed.push(order),
                // One leg failing must not leave the rest of the book open
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "Failed to close position")
                }
            }
        }
        info!(count = closed.len(), "Closed all positions");
        Ok(closed)
    }

    async fn balance(&self) -> TradingResult<BalanceView> {
        let account = self.engine.ledger().account(&self.account_id)?;
        let positions = self.engine.ledger().positions_for(&self.account_id);

        let mut position_value = Decimal::ZERO;
        let mut unrealized_pnl = Decimal::ZERO;
        let mut realized_pnl = Decimal::ZERO;
        for position in &positions {
            realized_pnl += position.realized_pnl;
            if position.is_flat() {
                continue;
            }
            match self
                .engine
                .prices()
                .price(&position.symbol, &position.venue)
                .await
            {
                Ok(price) => {
                    position_value += position.quantity * price;
                    unrealized_pnl += position.unrealized_pnl(price);
                }
                Err(_) => position_value += position.quantity * position.average_price,
            }
        }

        Ok(BalanceView {
            account_id: account.account_id.clone(),
            currency: account.currency,
            initial_balance: account.initial_balance,
            cash_balance: account.current_balance,
            used_balance: account.initial_balance - account.current_balance,
            position_value,
            total_equity: account.current_balance + position_value,
            realized_pnl,
            unrealized_pnl,
        })
    }

    async fn statistics(&self) -> TradingResult<AccountStatistics> {
        self.engine.ledger().statistics(&self.account_id)
    }

    async fn reset(&self) -> TradingResult<Account> {
        let _guard = self.engine.ledger().lock_account(&self.account_id).await;
        self.engine.ledger().reset_account(&self.account_id)
    }
}

/// Hands out one trading service per account, cached across calls
pub struct ServiceRegistry {
    engine: Arc<MatchingEngine>,
    services: DashMap<AccountId, Arc<dyn TradingService>>,
}

impl ServiceRegistry {
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        Self {
            engine,
            services: DashMap::new(),
        }
    }

    /// Returns the service for the account, constructing it on first use.
    ///
    /// Errors when the configured mode has no backend.
    pub fn service(&self, account_id: &str) -> TradingResult<Arc<dyn TradingService>> {
        match self.engine.config().mode {
            TradingMode::Paper => Ok(self
                .services
                .entry(account_id.to_string())
                .or_insert_with(|| {
                    Arc::new(PaperTradingService::new(
                        self.engine.clone(),
                        account_id.to_string(),
                    )) as Arc<dyn TradingService>
                })
                .clone()),
            TradingMode::Live => Err(TradingError::Unsupported(
                "Live trading backend is not available".into(),
            )),
        }
    }
}
