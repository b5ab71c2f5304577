//! Simbroker - Paper Trading Simulator CLI
//!
//! Wires the quote feed, ledger, matching engine and order monitor together
//! and runs the simulator until interrupted. Without a live brokerage feed
//! the binary seeds the scriptable quote source with a handful of symbols so
//! the engine has prices to match against.

use anyhow::Result;
use clap::Parser;
use matching_engine::{MatchingEngine, OrderMonitor, ServiceRegistry};
use rust_decimal_macros::dec;
use simbroker_core::SimulatorConfig;
use simbroker_ledger::LedgerStore;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Account to open at startup
    #[arg(short, long, default_value = "default")]
    account: String,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_tracing(&args.log_level, args.json_logs)?;

    info!("📈 Starting Simbroker v{}", env!("CARGO_PKG_VERSION"));

    let config = SimulatorConfig::load(Some(&args.config))?;
    info!(
        mode = ?config.mode,
        balance = %config.default_balance,
        currency = %config.default_currency,
        "✅ Configuration loaded"
    );

    // Scriptable quote source standing in for a live feed
    let source = Arc::new(market_feed::MockQuoteSource::new());
    source.set_price("RELIANCE", "NSE", dec!(2850.00));
    source.set_price("TCS", "NSE", dec!(4120.00));
    source.set_price("INFY", "NSE", dec!(1880.00));
    source.set_price("SBIN", "NSE", dec!(812.00));

    let prices = Arc::new(market_feed::PriceCache::new(
        source,
        config.price_ttl(),
        config.quote_timeout(),
    ));
    let ledger = Arc::new(LedgerStore::new(config.clone()));
    let engine = Arc::new(MatchingEngine::new(ledger, prices, config));
    info!("✅ Matching engine initialized");

    let registry = ServiceRegistry::new(engine.clone());
    let service = registry.service(&args.account)?;
    let balance = service.balance().await?;
    info!(
        account = %balance.account_id,
        cash = %balance.cash_balance,
        currency = %balance.currency,
        "✅ Account ready"
    );

    let shutdown = CancellationToken::new();
    let monitor_handle = OrderMonitor::new(engine).spawn(shutdown.clone());

    wait_for_shutdown().await;

    info!("🛑 Shutting down Simbroker...");
    shutdown.cancel();
    monitor_handle.await?;
    info!("✅ Simbroker shut down gracefully");

    Ok(())
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let level_filter = match log_level.to_lowercase().as_str() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    let filter = EnvFilter::from_default_env().add_directive(level_filter.into());

    if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).try_init()?;
    } else {
        let layer = tracing_subscriber::fmt::layer().with_filter(filter);
        tracing_subscriber::registry().with(layer).try_init()?;
    }
    Ok(())
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("📡 Received shutdown signal (Ctrl+C)"),
        Err(err) => error!("💥 Failed to listen for shutdown signal: {:?}", err),
    }
}
