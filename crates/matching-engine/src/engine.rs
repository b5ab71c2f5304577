//! Order matching against cached market prices.
//!
//! Every order kind reduces to two questions per evaluation: does the
//! current price satisfy the order's condition, and at what price does it
//! fill. Market orders fill at the market price, limit orders fill at their
//! limit price once the market crosses it, stop orders arm first and then
//! behave as market or limit orders.
//!
//! All evaluation for one account runs under that account's ledger lock, so
//! a submission-time fill, a background pass and a cancel can never race on
//! the same order.

use market_feed::PriceCache;
use rust_decimal::Decimal;
use simbroker_core::{
    Order, OrderRequest, OrderSide, OrderType, SimulatorConfig, TradingError, TradingResult,
};
use simbroker_ledger::LedgerStore;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Simulated execution engine shared by all accounts
pub struct MatchingEngine {
    ledger: Arc<LedgerStore>,
    prices: Arc<PriceCache>,
    config: SimulatorConfig,
}

/// True when the market price has crossed the limit price
fn limit_crossed(side: OrderSide, limit: Decimal, price: Decimal) -> bool {
    match side {
        OrderSide::Buy => price <= limit,
        OrderSide::Sell => price >= limit,
    }
}

/// True when the market price has reached the stop trigger
fn stop_reached(side: OrderSide, trigger: Decimal, price: Decimal) -> bool {
    match side {
        OrderSide::Buy => price >= trigger,
        OrderSide::Sell => price <= trigger,
    }
}

impl MatchingEngine {
    pub fn new(ledger: Arc<LedgerStore>, prices: Arc<PriceCache>, config: SimulatorConfig) -> Self {
        Self {
            ledger,
            prices,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn prices(&self) -> &Arc<PriceCache> {
        &self.prices
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Validates, persists and immediately evaluates a new order.
    ///
    /// An invalid request errors before anything is persisted. A market
    /// order either fills here or is rejected; a resting order that cannot
    /// fill yet is returned `Pending`. Funds and holdings failures reject
    /// the persisted order and propagate as errors.
    #[instrument(skip(self, request), fields(account = %account_id, symbol = %request.symbol))]
    pub async fn submit(&self, account_id: &str, request: OrderRequest) -> TradingResult<Order> {
        request.validate()?;
        self.ledger.open_or_get_account(account_id);

        let order = Order::new(account_id.to_string(), request);
        let _guard = self.ledger.lock_account(account_id).await;
        self.ledger.insert_order(order.clone());
        info!(order_id = %order.id, side = %order.side, order_type = ?order.order_type,
              quantity = %order.quantity, "Accepted order");

        self.evaluate_locked(order).await
    }

    /// Cancels an order under its account lock.
    ///
    /// A cancel that loses a race with a fill reports `AlreadyFilled`, never
    /// a silent success.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: simbroker_core::OrderId) -> TradingResult<Order> {
        let order = self.ledger.order(order_id)?;
        let _guard = self.ledger.lock_account(&order.account_id).await;
        self.ledger.cancel_order(order_id)
    }

    /// Re-evaluates every pending order of one account in submission order.
    ///
    /// Earlier orders get first claim on funds. A failure on one order is
    /// recorded against that order only; the rest of the batch still runs.
    pub async fn evaluate_account(&self, account_id: &str) {
        let _guard = self.ledger.lock_account(account_id).await;
        for order in self.ledger.pending_orders_for(account_id) {
            let order_id = order.id;
            if let Err(e) = self.evaluate_locked(order).await {
                debug!(%order_id, error = %e, "Order not filled in this pass");
            }
        }
    }

    /// Evaluates one order against the current price. Caller holds the
    /// account lock.
    async fn evaluate_locked(&self, order: Order) -> TradingResult<Order> {
        let mut order = order;
        if !order.is_active() {
            return Ok(order);
        }

        let quote = match self.prices.quote(&order.symbol, &order.venue).await {
            Ok(quote) => quote,
            Err(e) => {
                // A market order cannot wait for a price; resting orders
                // simply stay pending until the feed recovers.
                if order.order_type == OrderType::Market {
                    warn!(order_id = %order.id, error = %e, "Rejecting market order, no price");
                    self.ledger
                        .reject(order.id, &format!("Price unavailable: {e}"))?;
                    return Err(TradingError::PriceUnavailable(format!(
                        "{}-{}",
                        order.symbol, order.venue
                    )));
                }
                return Ok(order);
            }
        };
        let price = quote.price;
        if quote.stale {
            debug!(order_id = %order.id, %price, "Evaluating against stale price");
        }

        // Phase one for stop-limits: arm the trigger, then fall through to
        // the limit check in the same pass.
        if order.order_type == OrderType::StopLimit && !order.triggered {
            let trigger = order
                .trigger_price
                .ok_or_else(|| TradingError::Internal("Stop order without trigger price".into()))?;
            if !stop_reached(order.side, trigger, price) {
                return Ok(order);
            }
            order = self.ledger.mark_triggered(order.id)?;
            info!(order_id = %order.id, %trigger, %price, "Stop trigger fired, resting as limit");
        }

        let fill_price = match order.order_type {
            OrderType::Market => Some(price),
            OrderType::Limit | OrderType::StopLimit => {
                let limit = order.limit_price.ok_or_else(|| {
                    TradingError::Internal("Limit order without limit price".into())
                })?;
                limit_crossed(order.side, limit, price).then_some(limit)
            }
            OrderType::StopMarket => {
                let trigger = order.trigger_price.ok_or_else(|| {
                    TradingError::Internal("Stop order without trigger price".into())
                })?;
                stop_reached(order.side, trigger, price).then_some(price)
            }
        };

        match fill_price {
            Some(fill_price) => {
                self.ledger
                    .apply_fill(order.id, order.remaining_quantity(), fill_price)
            }
            None => Ok(order),
        }
    }
}
