use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use dexbot::config::Config;
use dexbot::db::PostgresStore;
use dexbot::execution::{
    ExecutorConfig, LoopSettings, SignerGateway, TradeExecutor, TradingLoop,
};
use dexbot::oracle::{synthetic_history, PriceOracle, PriceSource};
use dexbot::risk::RiskManager;
use dexbot::rpc::RpcClient;
use dexbot::strategy::{IndicatorEngine, SignalAggregator};
use dexbot::Result;

const INCLUSION_TIMEOUT_SECS: u64 = 300;
const RECEIPT_POLL_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "dexbot", about = "Risk-managed DEX trading bot")]
struct Cli {
    /// Record simulated fills instead of submitting transactions
    #[arg(long)]
    dry_run: bool,

    /// Override the tick interval in seconds
    #[arg(long)]
    tick_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let tick_secs = cli.tick_secs.unwrap_or(config.tick_secs);

    tracing::info!("🚀 dexbot starting");
    tracing::info!("  Endpoints: {}", config.rpc_endpoints.len());
    tracing::info!("  Pool: {}", config.pool_address);
    tracing::info!("  Tick: {}s", tick_secs);
    tracing::info!("  Mode: {}", if cli.dry_run { "dry-run" } else { "live" });

    if !cli.dry_run && config.signer_url.is_none() {
        return Err(dexbot::BotError::Config(
            "SIGNER_URL is required in live mode".to_string(),
        ));
    }

    let store = connect_store(config.database_url.as_deref()).await;

    // An active stop or partially spent daily caps survive a restart. A
    // state row that fails validation is fatal on purpose.
    let limits = config.risk_limits.clone();
    let now = Utc::now();
    let risk = match &store {
        Some(store) => match store.load_risk_state().await? {
            Some(state) => {
                tracing::info!(mode = state.mode.as_str(), "resuming persisted risk state");
                RiskManager::restore(limits, state, now)?
            }
            None => RiskManager::new(limits, now),
        },
        None => RiskManager::new(limits, now),
    };

    let client = RpcClient::new(config.rpc_endpoints.clone())?;
    let oracle = PriceOracle::new(client.clone(), config.pool_address.clone());

    let signer = SignerGateway::new(
        config
            .signer_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:8100".to_string()),
        config.wallet_address.clone(),
    )?;
    let executor = TradeExecutor::new(
        Arc::new(client.clone()),
        Arc::new(client.clone()),
        Arc::new(signer),
        ExecutorConfig {
            wallet_address: config.wallet_address.clone(),
            base_token_address: config.base_token_address.clone(),
            base_token_decimals: config.base_token_decimals,
            quote_token_address: config.quote_token_address.clone(),
            quote_token_decimals: config.quote_token_decimals,
            inclusion_timeout: Duration::from_secs(INCLUSION_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(RECEIPT_POLL_SECS),
        },
    );

    let settings = LoopSettings {
        tick_interval: Duration::from_secs(tick_secs),
        sizing_fraction: config.sizing_fraction,
        slippage_bps: config.slippage_bps,
        gas_limit: config.gas_limit,
        dry_run: cli.dry_run,
        wallet_address: config.wallet_address.clone(),
        quote_token_address: config.quote_token_address.clone(),
        quote_token_decimals: config.quote_token_decimals,
    };

    let mut trading = TradingLoop::new(
        Arc::new(oracle),
        Arc::new(client.clone()),
        executor,
        IndicatorEngine::new(config.indicators.clone()),
        SignalAggregator::default(),
        risk,
        store,
        settings,
    );

    warm_up_indicators(&mut trading, &client, &config).await;

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let mut loop_task = tokio::spawn(async move { trading.run(loop_cancel).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Ctrl+C received, shutting down...");
            cancel.cancel();
        }
        result = &mut loop_task => {
            report_loop_exit(result)?;
            tracing::info!("👋 dexbot stopped");
            return Ok(());
        }
    }

    // Let the loop flush its state before the process exits
    report_loop_exit(loop_task.await)?;
    tracing::info!("👋 dexbot stopped");
    Ok(())
}

fn report_loop_exit(result: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            tracing::info!("trading loop exited cleanly");
            Ok(())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "trading loop failed");
            Err(e)
        }
        Err(e) => {
            tracing::error!(error = %e, "trading loop panicked");
            Ok(())
        }
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dexbot=info".into()),
        )
        .init();
}

async fn connect_store(database_url: Option<&str>) -> Option<PostgresStore> {
    let database_url = database_url?;
    match PostgresStore::new(database_url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "failed to connect to Postgres, continuing without persistence"
            );
            None
        }
    }
}

/// Seed the indicator window with a random walk around the current price.
/// If the seed read fails, start cold; the loop holds until the window
/// fills with live data anyway.
async fn warm_up_indicators(trading: &mut TradingLoop, client: &RpcClient, config: &Config) {
    client.begin_tick().await;
    let oracle = PriceOracle::new(client.clone(), config.pool_address.clone());
    match oracle.fetch_price().await {
        Ok(point) => {
            let history = synthetic_history(
                point.price,
                config.warmup_points,
                chrono::Duration::seconds(config.tick_secs as i64),
                50,
                Utc::now(),
            );
            trading.warm_up(history);
        }
        Err(e) => {
            tracing::warn!(error = %e, "seed price read failed, starting with a cold window");
        }
    }
}
