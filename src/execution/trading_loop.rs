use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::db::PostgresStore;
use crate::execution::executor::{ChainReader, SwapRequest, TradeExecutor};
use crate::models::{PortfolioSnapshot, PricePoint, Signal, TradeOutcome, TradeRecord, TradeSide};
use crate::oracle::PriceSource;
use crate::risk::{RiskManager, TradeProposal};
use crate::strategy::{IndicatorEngine, SignalAggregator};
use crate::Result;

/// Router deadline applied to every submitted swap.
const SWAP_DEADLINE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    /// Fraction of the portfolio valuation committed per trade, clamped to
    /// the per-trade risk cap.
    pub sizing_fraction: Decimal,
    /// Slippage tolerance applied to the swap output floor.
    pub slippage_bps: u32,
    pub gas_limit: u64,
    /// Simulated fills instead of live submissions.
    pub dry_run: bool,
    pub wallet_address: String,
    pub quote_token_address: String,
    pub quote_token_decimals: u32,
}

/// The tick loop: read, evaluate, maybe trade, persist.
///
/// Each tick runs the same fixed order. Risk evaluation happens every tick
/// whether or not a trade follows, so an emergency stop trips on the read
/// that reveals the drawdown, not on the next trade attempt. Snapshots are
/// published wholesale through a watch channel; observers never see a
/// half-updated portfolio.
pub struct TradingLoop {
    oracle: Arc<dyn PriceSource>,
    reader: Arc<dyn ChainReader>,
    executor: TradeExecutor,
    engine: IndicatorEngine,
    aggregator: SignalAggregator,
    risk: RiskManager,
    store: Option<PostgresStore>,
    settings: LoopSettings,
    snapshot_tx: watch::Sender<Option<PortfolioSnapshot>>,
    last_trade: Option<TradeRecord>,
}

impl TradingLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: Arc<dyn PriceSource>,
        reader: Arc<dyn ChainReader>,
        executor: TradeExecutor,
        engine: IndicatorEngine,
        aggregator: SignalAggregator,
        risk: RiskManager,
        store: Option<PostgresStore>,
        settings: LoopSettings,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        Self {
            oracle,
            reader,
            executor,
            engine,
            aggregator,
            risk,
            store,
            settings,
            snapshot_tx,
            last_trade: None,
        }
    }

    /// Observe published portfolio snapshots.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Option<PortfolioSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Pre-load the indicator window, typically with a synthetic backfill.
    pub fn warm_up(&mut self, history: Vec<PricePoint>) {
        let count = history.len();
        for point in history {
            self.engine.push(point);
        }
        tracing::info!(points = count, "indicator window warmed up");
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn last_trade(&self) -> Option<&TradeRecord> {
        self.last_trade.as_ref()
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.tick_interval,
            self.settings.tick_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.settings.tick_interval.as_secs(),
            dry_run = self.settings.dry_run,
            "🚀 trading loop started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("shutdown requested, flushing state");
                    self.flush_risk().await;
                    break;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.run_tick(now, &cancel).await {
                        if e.is_transient() {
                            tracing::warn!(error = %e, "tick failed, continuing");
                        } else {
                            tracing::error!(error = %e, "fatal error, stopping loop");
                            return Err(e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// One full tick: price, snapshot, risk evaluation, signal, trade.
    ///
    /// Every network await inside the tick observes `cancel`, so shutdown
    /// takes effect mid-tick instead of after a slow read or a long
    /// inclusion poll. A cancelled tick returns Ok; the outer loop flushes
    /// and exits on the next select.
    pub async fn run_tick(&mut self, now: DateTime<Utc>, cancel: &CancellationToken) -> Result<()> {
        self.oracle.begin_tick().await;

        let Some(fetched) = or_cancelled(cancel, self.oracle.fetch_price()).await else {
            return Ok(());
        };
        let price = match fetched {
            Ok(point) => {
                self.risk.note_connectivity(true);
                point
            }
            Err(e) => {
                tracing::warn!(error = %e, "price read failed, holding this tick");
                self.risk.note_connectivity(false);
                self.risk.evaluate(now);
                self.flush_risk().await;
                return Ok(());
            }
        };
        tracing::debug!(price = %price.price, endpoint = %price.endpoint_id, "tick price");
        self.engine.push(price.clone());

        let reads = async {
            let base = self
                .reader
                .native_balance(&self.settings.wallet_address)
                .await;
            let quote = self
                .reader
                .token_balance(
                    &self.settings.quote_token_address,
                    &self.settings.wallet_address,
                    self.settings.quote_token_decimals,
                )
                .await;
            (base, quote)
        };
        let Some((base, quote)) = or_cancelled(cancel, reads).await else {
            return Ok(());
        };
        let valuation = match (base, quote) {
            (Ok(base), Ok(quote)) => {
                let snapshot = PortfolioSnapshot::new(base, quote, price.price, now);
                self.risk.update_snapshot(&snapshot);
                if let Some(store) = &self.store {
                    if let Err(e) = store.save_snapshot(&snapshot).await {
                        tracing::error!(error = %e, "failed to persist snapshot");
                    }
                }
                let valuation = snapshot.valuation;
                self.snapshot_tx.send_replace(Some(snapshot));
                valuation
            }
            (base, quote) => {
                let e = base.err().or(quote.err()).expect("one read failed");
                tracing::warn!(error = %e, "balance read failed, holding this tick");
                self.risk.note_connectivity(false);
                self.risk.evaluate(now);
                self.flush_risk().await;
                return Ok(());
            }
        };

        self.risk.evaluate(now);
        self.flush_risk().await;

        let votes = self.engine.compute();
        let signal = self.aggregator.decide(&votes);
        tracing::info!(
            sma = ?votes.sma,
            rsi = ?votes.rsi,
            macd = ?votes.macd,
            decision = ?signal,
            "📊 signals"
        );

        let side = match signal {
            Signal::Buy => TradeSide::Buy,
            Signal::Sell => TradeSide::Sell,
            Signal::Hold => return Ok(()),
        };

        // Size from the portfolio, clamped to the per-trade cap so sizing
        // never argues with risk.
        let amount = (valuation * self.settings.sizing_fraction)
            .min(self.risk.limits().max_trade_size);
        if amount <= Decimal::ZERO {
            tracing::debug!("nothing to trade with, skipping");
            return Ok(());
        }

        let Some(gas_read) = or_cancelled(cancel, self.reader.gas_price_gwei()).await else {
            return Ok(());
        };
        let gas_price = match gas_read {
            Ok(gwei) => gwei,
            Err(e) => {
                tracing::warn!(error = %e, "gas price read failed, skipping trade");
                return Ok(());
            }
        };

        let proposal = TradeProposal {
            side,
            amount,
            gas_price_gwei: gas_price,
        };
        if let Err(denial) = self.risk.authorize(&proposal, now) {
            tracing::info!(reason = denial.as_str(), "trade suppressed");
            self.flush_risk().await;
            return Ok(());
        }
        // Counters are charged; persist them before anything touches the
        // network.
        self.flush_risk().await;

        // Expected swap output: quote tokens on a buy, base asset on a sell.
        let expected_out = match side {
            TradeSide::Buy => amount / price.price,
            TradeSide::Sell => amount,
        };
        let slippage = Decimal::from(self.settings.slippage_bps) / Decimal::from(10_000u32);
        let min_amount_out = expected_out * (Decimal::ONE - slippage);

        let record = if self.settings.dry_run {
            let mut record = TradeRecord::new(side, amount, gas_price, self.settings.gas_limit);
            record.simulated = true;
            record.confirm(expected_out, now);
            tracing::info!(side = side.as_str(), amount = %record.requested_amount, "🧪 simulated fill");
            record
        } else {
            let request = SwapRequest {
                side,
                amount,
                min_amount_out,
                gas_price_gwei: gas_price,
                gas_limit: self.settings.gas_limit,
                deadline: now + chrono::Duration::seconds(SWAP_DEADLINE_SECS),
            };
            let record = self.executor.execute(&request, cancel).await;
            if record.outcome == TradeOutcome::Failed && record.tx_hash.is_none() {
                // Never reached the network; give the counters back.
                self.risk.release(&proposal);
            }
            record
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save_trade(&record).await {
                tracing::error!(error = %e, trade_id = %record.id, "failed to persist trade");
            }
        }
        self.last_trade = Some(record);
        self.flush_risk().await;

        Ok(())
    }

    /// Persist accumulated risk events and the current risk state. Storage
    /// failures are logged, not fatal; the in-memory state stays canonical.
    async fn flush_risk(&mut self) {
        let events = self.risk.drain_events();
        let Some(store) = &self.store else {
            return;
        };
        for event in &events {
            if let Err(e) = store.save_risk_event(event).await {
                tracing::error!(error = %e, kind = event.kind.as_str(), "failed to persist risk event");
            }
        }
        if let Err(e) = store.save_risk_state(self.risk.state()).await {
            tracing::error!(error = %e, "failed to persist risk state");
        }
    }
}

/// Race a tick await against shutdown. None means the loop is stopping and
/// the awaited work was abandoned.
async fn or_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::execution::executor::{Broadcaster, ExecutorConfig, TxSigner};
    use crate::risk::RiskLimits;
    use crate::rpc::TxReceipt;
    use crate::strategy::{AgreementPolicy, IndicatorConfig};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const WETH: &str = "0x2222222222222222222222222222222222222222";
    const TOKEN: &str = "0x3333333333333333333333333333333333333333";

    struct ScriptedOracle {
        prices: Mutex<VecDeque<Result<Decimal>>>,
    }

    impl ScriptedOracle {
        fn new(prices: Vec<Result<Decimal>>) -> Self {
            Self {
                prices: Mutex::new(prices.into()),
            }
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedOracle {
        async fn fetch_price(&self) -> Result<PricePoint> {
            let next = self
                .prices
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(dec!(100)));
            next.map(|price| PricePoint {
                timestamp: Utc::now(),
                price,
                endpoint_id: "scripted".to_string(),
            })
        }
    }

    struct ScriptedChain {
        native: Mutex<VecDeque<Decimal>>,
        quote: Decimal,
    }

    impl ScriptedChain {
        fn new(native: Vec<Decimal>, quote: Decimal) -> Self {
            Self {
                native: Mutex::new(native.into()),
                quote,
            }
        }
    }

    #[async_trait]
    impl ChainReader for ScriptedChain {
        async fn gas_price_gwei(&self) -> Result<Decimal> {
            Ok(dec!(30))
        }

        async fn token_balance(&self, _: &str, _: &str, _: u32) -> Result<Decimal> {
            Ok(self.quote)
        }

        async fn native_balance(&self, _: &str) -> Result<Decimal> {
            let mut native = self.native.lock().unwrap();
            if native.len() > 1 {
                Ok(native.pop_front().unwrap())
            } else {
                Ok(*native.front().unwrap())
            }
        }

        async fn transaction_receipt(&self, _: &str) -> Result<Option<TxReceipt>> {
            Ok(None)
        }
    }

    struct FailingBroadcaster;

    #[async_trait]
    impl Broadcaster for FailingBroadcaster {
        async fn broadcast(&self, _: &str) -> Result<String> {
            Err(BotError::NoEndpointAvailable { attempts: 3 })
        }
    }

    struct StubSigner;

    #[async_trait]
    impl TxSigner for StubSigner {
        async fn sign_swap(&self, _: &SwapRequest) -> Result<String> {
            Ok("0xsigned".to_string())
        }
    }

    fn settings(dry_run: bool) -> LoopSettings {
        LoopSettings {
            tick_interval: Duration::from_secs(60),
            sizing_fraction: dec!(0.15),
            slippage_bps: 50,
            gas_limit: 300_000,
            dry_run,
            wallet_address: WALLET.to_string(),
            quote_token_address: TOKEN.to_string(),
            quote_token_decimals: 18,
        }
    }

    fn build_loop(
        oracle: ScriptedOracle,
        chain: ScriptedChain,
        dry_run: bool,
        policy: AgreementPolicy,
    ) -> TradingLoop {
        let reader: Arc<dyn ChainReader> = Arc::new(chain);
        let executor = TradeExecutor::new(
            reader.clone(),
            Arc::new(FailingBroadcaster),
            Arc::new(StubSigner),
            ExecutorConfig {
                wallet_address: WALLET.to_string(),
                base_token_address: WETH.to_string(),
                base_token_decimals: 18,
                quote_token_address: TOKEN.to_string(),
                quote_token_decimals: 18,
                inclusion_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
            },
        );
        TradingLoop::new(
            Arc::new(oracle),
            reader,
            executor,
            IndicatorEngine::new(IndicatorConfig::default()),
            SignalAggregator::new(policy),
            RiskManager::new(RiskLimits::default(), Utc::now()),
            None,
            settings(dry_run),
        )
    }

    /// Strictly climbing prices pin RSI at 100, which votes SELL, while the
    /// SMA and MACD crossovers stay quiet.
    fn climbing_history(points: usize) -> Vec<PricePoint> {
        (0..points)
            .map(|i| PricePoint {
                timestamp: Utc::now(),
                price: dec!(100) + Decimal::from(i as u64),
                endpoint_id: "scripted".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_tick_publishes_snapshot() {
        let mut trading = build_loop(
            ScriptedOracle::new(vec![Ok(dec!(2))]),
            ScriptedChain::new(vec![dec!(1)], dec!(3)),
            true,
            AgreementPolicy::default(),
        );
        let rx = trading.subscribe_snapshots();

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();

        let snapshot = rx.borrow().clone().expect("snapshot published");
        assert_eq!(snapshot.base_balance, dec!(1));
        assert_eq!(snapshot.quote_balance, dec!(3));
        assert_eq!(snapshot.valuation, dec!(7));
    }

    #[tokio::test]
    async fn test_price_failure_holds_tick_without_state_change() {
        let mut trading = build_loop(
            ScriptedOracle::new(vec![Err(BotError::NoEndpointAvailable { attempts: 2 })]),
            ScriptedChain::new(vec![dec!(1)], dec!(0)),
            true,
            AgreementPolicy::default(),
        );
        let rx = trading.subscribe_snapshots();

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();

        assert!(rx.borrow().is_none());
        assert_eq!(
            trading.risk().mode(),
            crate::models::RiskMode::Normal
        );
        assert!(trading.last_trade().is_none());
    }

    #[tokio::test]
    async fn test_rally_triggers_simulated_sell() {
        let mut trading = build_loop(
            ScriptedOracle::new(vec![Ok(dec!(150))]),
            ScriptedChain::new(vec![dec!(1)], dec!(0)),
            true,
            AgreementPolicy::Any,
        );
        trading.warm_up(climbing_history(50));

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();

        let record = trading.last_trade().expect("trade recorded");
        assert_eq!(record.side, TradeSide::Sell);
        assert!(record.simulated);
        assert_eq!(record.outcome, TradeOutcome::Confirmed);
        assert_eq!(trading.risk().state().daily_trade_count, 1);
        assert_eq!(trading.risk().state().daily_volume, dec!(0.01));
    }

    #[tokio::test]
    async fn test_drawdown_trips_stop_and_suppresses_trades() {
        // Valuation 10 then 6.5, a 35% drop against the 20% stop.
        let mut trading = build_loop(
            ScriptedOracle::new(vec![Ok(dec!(150)), Ok(dec!(151)), Ok(dec!(152))]),
            ScriptedChain::new(vec![dec!(10), dec!(6.5)], dec!(0)),
            true,
            AgreementPolicy::Any,
        );
        trading.warm_up(climbing_history(50));

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();
        assert_eq!(trading.risk().mode(), crate::models::RiskMode::Normal);
        let trades_after_first = trading.risk().state().daily_trade_count;

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();
        assert_eq!(
            trading.risk().mode(),
            crate::models::RiskMode::EmergencyStop
        );
        // The SELL signal is still live but everything is denied now.
        assert_eq!(
            trading.risk().state().daily_trade_count,
            trades_after_first
        );
    }

    #[tokio::test]
    async fn test_live_broadcast_failure_releases_counters() {
        let mut trading = build_loop(
            ScriptedOracle::new(vec![Ok(dec!(150))]),
            ScriptedChain::new(vec![dec!(1)], dec!(0)),
            false,
            AgreementPolicy::Any,
        );
        trading.warm_up(climbing_history(50));

        trading.run_tick(Utc::now(), &CancellationToken::new()).await.unwrap();

        let record = trading.last_trade().expect("trade recorded");
        assert_eq!(record.outcome, TradeOutcome::Failed);
        assert!(record.tx_hash.is_none());
        // Counters were charged at authorization, then released when the
        // transaction never reached the network.
        assert_eq!(trading.risk().state().daily_trade_count, 0);
        assert_eq!(trading.risk().state().daily_volume, Decimal::ZERO);
    }

    struct HungOracle;

    #[async_trait]
    impl PriceSource for HungOracle {
        async fn fetch_price(&self) -> Result<PricePoint> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_hung_price_read() {
        // A price read that never resolves must not ride out the shutdown
        // signal; cancellation is observed inside the tick.
        let reader: Arc<dyn ChainReader> = Arc::new(ScriptedChain::new(vec![dec!(1)], dec!(0)));
        let executor = TradeExecutor::new(
            reader.clone(),
            Arc::new(FailingBroadcaster),
            Arc::new(StubSigner),
            ExecutorConfig {
                wallet_address: WALLET.to_string(),
                base_token_address: WETH.to_string(),
                base_token_decimals: 18,
                quote_token_address: TOKEN.to_string(),
                quote_token_decimals: 18,
                inclusion_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
            },
        );
        let mut loop_settings = settings(true);
        loop_settings.tick_interval = Duration::from_millis(1);
        let trading = TradingLoop::new(
            Arc::new(HungOracle),
            reader,
            executor,
            IndicatorEngine::new(IndicatorConfig::default()),
            SignalAggregator::new(AgreementPolicy::default()),
            RiskManager::new(RiskLimits::default(), Utc::now()),
            None,
            loop_settings,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(trading.run(cancel.clone()));

        // Let the first tick start and block inside the price read.
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stopped promptly after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }
}
