use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use simbroker_core::{
    Account, AccountId, Order, OrderFilter, OrderId, OrderSide, OrderStatus, Position,
    PositionKey, SimulatorConfig, Trade, TradeFilter, TradingError, TradingResult,
};

/// Account-level statistics derived from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatistics {
    pub total_orders: usize,
    pub pending_orders: usize,
    pub filled_orders: usize,
    pub cancelled_orders: usize,
    pub rejected_orders: usize,
    pub total_trades: usize,
    pub open_positions: usize,
    pub total_realized_pnl: Decimal,
    /// Percentage change of the cash balance against the opening balance
    pub profit_loss_pct: Decimal,
}

/// In-memory ledger of accounts, orders, positions and trades.
///
/// All mutations of one account's records must run under that account's
/// lock, obtained with [`LedgerStore::lock_account`]. The synchronous
/// submission path, the background evaluation pass and cancellation all
/// acquire the same lock, so their fill-application steps can never
/// interleave for one account. Unrelated accounts proceed independently.
pub struct LedgerStore {
    config: SimulatorConfig,

    /// Accounts indexed by account id
    accounts: DashMap<AccountId, Account>,

    /// All orders ever placed, retained for audit
    orders: DashMap<OrderId, Order>,

    /// Positions keyed by (account, symbol, venue, product)
    positions: DashMap<PositionKey, Position>,

    /// Append-only fill records
    trades: RwLock<Vec<Trade>>,

    /// Per-account mutual exclusion for ledger mutations
    account_locks: DashMap<AccountId, Arc<Mutex<()>>>,
}

impl LedgerStore {
    /// Creates an empty ledger using the given defaults for new accounts
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
            orders: DashMap::new(),
            positions: DashMap::new(),
            trades: RwLock::new(Vec::new()),
            account_locks: DashMap::new(),
        }
    }

    /// Acquires the mutation lock for one account.
    ///
    /// The guard must be held across any sequence of condition checks and
    /// ledger mutations that has to be atomic with respect to other writers
    /// of the same account.
    pub async fn lock_account(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .account_locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Returns the account, creating it with the configured default balance
    /// and currency on first use. Idempotent.
    pub fn open_or_get_account(&self, account_id: &str) -> Account {
        self.accounts
            .entry(account_id.to_string())
            .or_insert_with(|| {
                info!(
                    account = %account_id,
                    balance = %self.config.default_balance,
                    currency = %self.config.default_currency,
                    "Opening paper trading account"
                );
                Account::new(
                    account_id.to_string(),
                    self.config.default_balance,
                    self.config.default_currency,
                )
            })
            .clone()
    }

    /// Looks up an existing account
    pub fn account(&self, account_id: &str) -> TradingResult<Account> {
        self.accounts
            .get(account_id)
            .map(|a| a.clone())
            .ok_or_else(|| TradingError::AccountNotFound(account_id.to_string()))
    }

    /// Persists a freshly created order
    pub fn insert_order(&self, order: Order) {
        debug!(order_id = %order.id, account = %order.account_id, "Recording order");
        self.orders.insert(order.id, order);
    }

    /// Looks up an order by id
    pub fn order(&self, order_id: OrderId) -> TradingResult<Order> {
        self.orders
            .get(&order_id)
            .map(|o| o.clone())
            .ok_or(TradingError::OrderNotFound(order_id))
    }

    /// Orders for an account matching the filter, newest first
    pub fn orders_for(&self, account_id: &str, filter: &OrderFilter) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.account_id == account_id && filter.matches(o))
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    /// Pending orders for an account in ascending submission order, the
    /// evaluation order that gives the earliest order first claim on funds
    pub fn pending_orders_for(&self, account_id: &str) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.account_id == account_id && o.status == OrderStatus::Pending)
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        orders
    }

    /// Distinct accounts that currently have at least one pending order
    pub fn accounts_with_pending_orders(&self) -> Vec<AccountId> {
        let mut accounts: Vec<AccountId> = self
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending)
            .map(|o| o.account_id.clone())
            .collect();
        accounts.sort();
        accounts.dedup();
        accounts
    }

    /// Applies a fill to the ledger as one unit.
    ///
    /// Re-validates funds (BUY) or holdings (SELL) at the fill price,
    /// adjusts the cash balance, upserts the position, appends the trade
    /// and updates the order. A funds or holdings failure marks the order
    /// `Rejected` and returns the corresponding error; nothing else is
    /// mutated in that case.
    ///
    /// Callers must hold the account lock from [`Self::lock_account`].
    pub fn apply_fill(
        &self,
        order_id: OrderId,
        quantity: Decimal,
        price: Decimal,
    ) -> TradingResult<Order> {
        let order = self.order(order_id)?;

        match order.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {}
            OrderStatus::Filled => return Err(TradingError::AlreadyFilled(order_id)),
            OrderStatus::Cancelled => return Err(TradingError::AlreadyCancelled(order_id)),
            OrderStatus::Rejected => return Err(TradingError::AlreadyRejected(order_id)),
        }

        if quantity <= Decimal::ZERO || quantity > order.remaining_quantity() {
            return Err(TradingError::Internal(format!(
                "Fill quantity {} outside remaining quantity {} for order {}",
                quantity,
                order.remaining_quantity(),
                order_id
            )));
        }

        let value = quantity * price;

        // (a) re-validate at fill time: the price may have moved since
        // submission, so a fill is rejected whole rather than partially
        // applied
        match order.side {
            OrderSide::Buy => {
                let account = self.account(&order.account_id)?;
                if account.current_balance < value {
                    self.reject(order_id, "Insufficient funds")?;
                    return Err(TradingError::InsufficientFunds {
                        required: value,
                        available: account.current_balance,
                    });
                }
            }
            OrderSide::Sell if !self.config.allow_short_selling => {
                let held = self
                    .positions
                    .get(&order.position_key())
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO)
                    .max(Decimal::ZERO);
                if quantity > held {
                    self.reject(order_id, "Insufficient holdings")?;
                    return Err(TradingError::InsufficientHoldings {
                        requested: quantity,
                        held,
                    });
                }
            }
            OrderSide::Sell => {}
        }

        // (b) cash balance
        if let Some(mut account) = self.accounts.get_mut(&order.account_id) {
            match order.side {
                OrderSide::Buy => account.current_balance -= value,
                OrderSide::Sell => account.current_balance += value,
            }
            account.updated_at = Utc::now();
        }

        // (c) position upsert
        let realized = self
            .positions
            .entry(order.position_key())
            .or_insert_with(|| Position::new(order.position_key()))
            .apply_fill(order.side, quantity, price);

        // (d) immutable trade record
        self.trades.write().push(Trade::new(&order, quantity, price));

        // (e) order status, filled quantity and average fill price together
        let updated = {
            let mut entry = self
                .orders
                .get_mut(&order_id)
                .ok_or(TradingError::OrderNotFound(order_id))?;
            let prev_filled = entry.filled_quantity;
            let new_filled = prev_filled + quantity;
            entry.average_fill_price = Some(match entry.average_fill_price {
                Some(old) => (old * prev_filled + price * quantity) / new_filled,
                None => price,
            });
            entry.filled_quantity = new_filled;
            let now = Utc::now();
            if new_filled >= entry.quantity {
                entry.status = OrderStatus::Filled;
                entry.filled_at = Some(now);
            } else {
                entry.status = OrderStatus::PartiallyFilled;
            }
            entry.updated_at = now;
            entry.clone()
        };

        info!(
            order_id = %order_id,
            account = %order.account_id,
            symbol = %order.symbol,
            side = %order.side,
            %quantity,
            %price,
            %realized,
            "Filled order"
        );
        Ok(updated)
    }

    /// Transitions an active order to `Rejected` with a displayable reason
    pub fn reject(&self, order_id: OrderId, reason: &str) -> TradingResult<Order> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(TradingError::OrderNotFound(order_id))?;
        match entry.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                entry.status = OrderStatus::Rejected;
                entry.rejection_reason = Some(reason.to_string());
                entry.updated_at = Utc::now();
                warn!(order_id = %order_id, reason, "Rejected order");
                Ok(entry.clone())
            }
            OrderStatus::Filled => Err(TradingError::AlreadyFilled(order_id)),
            OrderStatus::Cancelled => Err(TradingError::AlreadyCancelled(order_id)),
            OrderStatus::Rejected => Err(TradingError::AlreadyRejected(order_id)),
        }
    }

    /// Transitions an active order to `Cancelled`.
    ///
    /// A cancel racing a fill must lose deterministically: callers hold the
    /// account lock, so by the time this runs any concurrent fill has either
    /// fully applied (this returns `AlreadyFilled`) or not started.
    pub fn cancel_order(&self, order_id: OrderId) -> TradingResult<Order> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(TradingError::OrderNotFound(order_id))?;
        match entry.status {
            OrderStatus::Pending | OrderStatus::PartiallyFilled => {
                entry.status = OrderStatus::Cancelled;
                entry.cancelled_at = Some(Utc::now());
                entry.updated_at = Utc::now();
                info!(order_id = %order_id, "Cancelled order");
                Ok(entry.clone())
            }
            OrderStatus::Filled => Err(TradingError::AlreadyFilled(order_id)),
            OrderStatus::Cancelled => Err(TradingError::AlreadyCancelled(order_id)),
            OrderStatus::Rejected => Err(TradingError::AlreadyRejected(order_id)),
        }
    }

    /// Records that a stop-limit order's trigger has fired and the order now
    /// rests as a plain limit order
    pub fn mark_triggered(&self, order_id: OrderId) -> TradingResult<Order> {
        let mut entry = self
            .orders
            .get_mut(&order_id)
            .ok_or(TradingError::OrderNotFound(order_id))?;
        entry.triggered = true;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// All position rows for an account, including flat (zero quantity) rows
    pub fn positions_for(&self, account_id: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.account_id == account_id)
            .map(|p| p.clone())
            .collect()
    }

    /// Looks up one position row
    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        self.positions.get(key).map(|p| p.clone())
    }

    /// Trade history for an account matching the filter, newest first
    pub fn trades_for(&self, account_id: &str, filter: &TradeFilter) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .read()
            .iter()
            .filter(|t| t.account_id == account_id && filter.matches(t))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        trades
    }

    /// Fill records belonging to one order
    pub fn trades_for_order(&self, order_id: OrderId) -> Vec<Trade> {
        self.trades
            .read()
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Deletes all orders, positions and trades for the account and restores
    /// the cash balance to the opening balance.
    ///
    /// Callers must hold the account lock.
    pub fn reset_account(&self, account_id: &str) -> TradingResult<Account> {
        let mut account = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| TradingError::AccountNotFound(account_id.to_string()))?;

        self.orders.retain(|_, o| o.account_id != account_id);
        self.positions.retain(|_, p| p.account_id != account_id);
        self.trades.write().retain(|t| t.account_id != account_id);

        account.current_balance = account.initial_balance;
        account.updated_at = Utc::now();
        info!(account = %account_id, "Reset paper trading account");
        Ok(account.clone())
    }

    /// Aggregated statistics for an account
    pub fn statistics(&self, account_id: &str) -> TradingResult<AccountStatistics> {
        let account = self.account(account_id)?;
        let orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.account_id == account_id)
            .map(|o| o.clone())
            .collect();

        let count = |status: OrderStatus| orders.iter().filter(|o| o.status == status).count();

        let positions = self.positions_for(account_id);
        let total_realized_pnl: Decimal = positions.iter().map(|p| p.realized_pnl).sum();
        let profit_loss_pct = if account.initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            (account.current_balance - account.initial_balance) / account.initial_balance
                * Decimal::ONE_HUNDRED
        };

        Ok(AccountStatistics {
            total_orders: orders.len(),
            pending_orders: count(OrderStatus::Pending),
            filled_orders: count(OrderStatus::Filled),
            cancelled_orders: count(OrderStatus::Cancelled),
            rejected_orders: count(OrderStatus::Rejected),
            total_trades: self.trades_for(account_id, &TradeFilter::default()).len(),
            open_positions: positions.iter().filter(|p| !p.is_flat()).count(),
            total_realized_pnl,
            profit_loss_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use simbroker_core::{OrderRequest, OrderSide, OrderType, ProductType};

    fn store() -> LedgerStore {
        LedgerStore::new(SimulatorConfig::default())
    }

    fn place(store: &LedgerStore, account: &str, side: OrderSide, quantity: Decimal) -> Order {
        store.open_or_get_account(account);
        let order = Order::new(
            account.to_string(),
            OrderRequest {
                symbol: "RELIANCE".into(),
                venue: "NSE".into(),
                side,
                product: ProductType::Delivery,
                order_type: OrderType::Market,
                quantity,
                limit_price: None,
                trigger_price: None,
            },
        );
        store.insert_order(order.clone());
        order
    }

    #[test]
    fn open_or_get_account_is_idempotent() {
        let store = store();
        let first = store.open_or_get_account("alice");
        let second = store.open_or_get_account("alice");
        assert_eq!(first.account_id, second.account_id);
        assert_eq!(first.current_balance, dec!(50000.00));
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn buy_fill_moves_balance_position_and_trade_together() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(10));

        let filled = store.apply_fill(order.id, dec!(10), dec!(100)).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.filled_quantity, dec!(10));
        assert_eq!(filled.average_fill_price, Some(dec!(100)));

        let account = store.account("alice").unwrap();
        assert_eq!(account.current_balance, dec!(49000.00));

        let position = store.position(&order.position_key()).unwrap();
        assert_eq!(position.quantity, dec!(10));
        assert_eq!(position.average_price, dec!(100));

        let trades = store.trades_for_order(order.id);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].value, dec!(1000));
    }

    #[test]
    fn insufficient_funds_rejects_without_side_effects() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(1000));

        let err = store.apply_fill(order.id, dec!(1000), dec!(100)).unwrap_err();
        assert!(matches!(err, TradingError::InsufficientFunds { .. }));

        let rejected = store.order(order.id).unwrap();
        assert_eq!(rejected.status, OrderStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Insufficient funds"));

        // Balance unchanged, no trade row, no position row
        assert_eq!(store.account("alice").unwrap().current_balance, dec!(50000.00));
        assert!(store.trades_for_order(order.id).is_empty());
        assert!(store.position(&order.position_key()).is_none());
    }

    #[test]
    fn sell_beyond_holdings_is_rejected_for_cash_account() {
        let store = store();
        let buy = place(&store, "alice", OrderSide::Buy, dec!(5));
        store.apply_fill(buy.id, dec!(5), dec!(100)).unwrap();

        let sell = place(&store, "alice", OrderSide::Sell, dec!(8));
        let err = store.apply_fill(sell.id, dec!(8), dec!(100)).unwrap_err();
        assert_eq!(
            err,
            TradingError::InsufficientHoldings {
                requested: dec!(8),
                held: dec!(5),
            }
        );
        assert_eq!(store.order(sell.id).unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn short_selling_allowed_when_configured() {
        let store = LedgerStore::new(SimulatorConfig {
            allow_short_selling: true,
            ..SimulatorConfig::default()
        });
        let sell = place(&store, "alice", OrderSide::Sell, dec!(5));

        let filled = store.apply_fill(sell.id, dec!(5), dec!(100)).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        let position = store.position(&sell.position_key()).unwrap();
        assert_eq!(position.quantity, dec!(-5));
    }

    #[test]
    fn closing_sell_realizes_pnl_and_credits_balance() {
        let store = store();
        let buy = place(&store, "alice", OrderSide::Buy, dec!(10));
        store.apply_fill(buy.id, dec!(10), dec!(100)).unwrap();

        let sell = place(&store, "alice", OrderSide::Sell, dec!(10));
        store.apply_fill(sell.id, dec!(10), dec!(110)).unwrap();

        let position = store.position(&sell.position_key()).unwrap();
        assert!(position.is_flat());
        assert_eq!(position.realized_pnl, dec!(100));

        let account = store.account("alice").unwrap();
        assert_eq!(account.current_balance, dec!(50100.00));
    }

    #[test]
    fn partial_fill_keeps_order_active_and_weights_average() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(10));

        let partial = store.apply_fill(order.id, dec!(4), dec!(100)).unwrap();
        assert_eq!(partial.status, OrderStatus::PartiallyFilled);
        assert_eq!(partial.filled_quantity, dec!(4));

        let full = store.apply_fill(order.id, dec!(6), dec!(110)).unwrap();
        assert_eq!(full.status, OrderStatus::Filled);
        assert_eq!(full.filled_quantity, dec!(10));
        assert_eq!(full.average_fill_price, Some(dec!(106)));

        assert_eq!(store.trades_for_order(order.id).len(), 2);
    }

    #[test]
    fn fill_beyond_remaining_quantity_is_an_internal_error() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(10));
        let err = store.apply_fill(order.id, dec!(11), dec!(10)).unwrap_err();
        assert!(matches!(err, TradingError::Internal(_)));
    }

    #[test]
    fn cancel_is_idempotent_in_outcome() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(10));

        let cancelled = store.cancel_order(order.id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let err = store.cancel_order(order.id).unwrap_err();
        assert_eq!(err, TradingError::AlreadyCancelled(order.id));
    }

    #[test]
    fn cancel_after_fill_reports_already_filled() {
        let store = store();
        let order = place(&store, "alice", OrderSide::Buy, dec!(10));
        store.apply_fill(order.id, dec!(10), dec!(100)).unwrap();

        let err = store.cancel_order(order.id).unwrap_err();
        assert_eq!(err, TradingError::AlreadyFilled(order.id));
    }

    #[test]
    fn reset_restores_opening_state() {
        let store = store();
        let buy = place(&store, "alice", OrderSide::Buy, dec!(10));
        store.apply_fill(buy.id, dec!(10), dec!(100)).unwrap();

        let account = store.reset_account("alice").unwrap();
        assert_eq!(account.current_balance, account.initial_balance);
        assert!(store.orders_for("alice", &OrderFilter::default()).is_empty());
        assert!(store.positions_for("alice").is_empty());
        assert!(store.trades_for("alice", &TradeFilter::default()).is_empty());
    }

    #[test]
    fn pending_orders_come_back_in_submission_order() {
        let store = store();
        let first = place(&store, "alice", OrderSide::Buy, dec!(1));
        let second = place(&store, "alice", OrderSide::Buy, dec!(2));
        let third = place(&store, "alice", OrderSide::Buy, dec!(3));

        let pending = store.pending_orders_for("alice");
        let ids: Vec<OrderId> = pending.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn statistics_aggregate_order_outcomes() {
        let store = store();
        let filled = place(&store, "alice", OrderSide::Buy, dec!(10));
        store.apply_fill(filled.id, dec!(10), dec!(100)).unwrap();
        let cancelled = place(&store, "alice", OrderSide::Buy, dec!(1));
        store.cancel_order(cancelled.id).unwrap();
        place(&store, "alice", OrderSide::Buy, dec!(1));

        let stats = store.statistics("alice").unwrap();
        assert_eq!(stats.total_orders, 3);
        assert_eq!(stats.filled_orders, 1);
        assert_eq!(stats.cancelled_orders, 1);
        assert_eq!(stats.pending_orders, 1);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.open_positions, 1);
        assert!(stats.profit_loss_pct < Decimal::ZERO);
    }

    #[tokio::test]
    async fn account_lock_serializes_writers() {
        let store = Arc::new(store());
        store.open_or_get_account("alice");

        let guard = store.lock_account("alice").await;
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock_account("alice").await;
            })
        };
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }
}
