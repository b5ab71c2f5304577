//! Periodic re-evaluation of resting orders.
//!
//! Runs one pass per tick: collect the accounts that have pending orders,
//! then evaluate them with bounded concurrency. Within one account the
//! engine serializes on the account lock, so the bound only controls how
//! many accounts make progress at once.

use futures_util::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::MatchingEngine;

/// Background driver for the matching engine
pub struct OrderMonitor {
    engine: Arc<MatchingEngine>,
    interval: Duration,
    concurrency: usize,
}

impl OrderMonitor {
    /// Builds a monitor from the engine's configured interval and account
    /// concurrency
    pub fn new(engine: Arc<MatchingEngine>) -> Self {
        let config = engine.config();
        let interval = config.evaluation_interval();
        let concurrency = config.evaluation_concurrency.max(1);
        Self {
            engine,
            interval,
            concurrency,
        }
    }

    /// Runs one evaluation pass over every account with pending orders
    pub async fn run_pass(&self) {
        let accounts = self.engine.ledger().accounts_with_pending_orders();
        if accounts.is_empty() {
            return;
        }
        debug!(accounts = accounts.len(), "Evaluation pass");

        stream::iter(accounts)
            .for_each_concurrent(self.concurrency, |account_id| {
                let engine = self.engine.clone();
                async move {
                    engine.evaluate_account(&account_id).await;
                }
            })
            .await;
    }

    /// Spawns the tick loop; it stops when the token is cancelled
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, concurrency = self.concurrency, "Order monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Order monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_pass().await;
                    }
                }
            }
        })
    }
}
