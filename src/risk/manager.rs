use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::error::BotError;
use crate::models::{PortfolioSnapshot, RiskEvent, RiskEventKind, RiskMode, RiskState};
use crate::risk::{Denial, RiskLimits, TradeProposal};
use crate::Result;

/// Owns the emergency-stop state machine, the daily counters, and the
/// portfolio high-water mark.
///
/// Only the execution loop mutates this; observability consumers get whole
/// snapshots through the loop's watch channel, never a reference in here.
///
/// The two stop triggers are deliberately distinguishable: a valuation
/// drawdown trips EMERGENCY_STOP, while a connectivity failure only sets a
/// per-tick hold that suspends authorization. Conflating them turns every
/// flaky RPC day into a trading halt.
pub struct RiskManager {
    limits: RiskLimits,
    state: RiskState,
    high_water_mark: Decimal,
    latest_valuation: Option<Decimal>,
    connectivity_healthy: bool,
    pending_events: Vec<RiskEvent>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            state: RiskState::new(now),
            high_water_mark: Decimal::ZERO,
            latest_valuation: None,
            connectivity_healthy: true,
            pending_events: Vec::new(),
        }
    }

    /// Resume from a persisted state, e.g. after a mid-day restart.
    ///
    /// A state that fails validation is fatal: the bot refuses to trade
    /// rather than guess at its own counters.
    pub fn restore(limits: RiskLimits, state: RiskState, now: DateTime<Utc>) -> Result<Self> {
        if state.daily_volume < Decimal::ZERO {
            return Err(BotError::CorruptRiskState(format!(
                "negative daily volume: {}",
                state.daily_volume
            )));
        }
        if state.day_window_start > now + Duration::minutes(5) {
            return Err(BotError::CorruptRiskState(format!(
                "day window starts in the future: {}",
                state.day_window_start
            )));
        }
        if state.mode == RiskMode::EmergencyStop
            && (state.stop_triggered_at.is_none() || state.stop_trigger_valuation.is_none())
        {
            return Err(BotError::CorruptRiskState(
                "emergency stop recorded without trigger time/valuation".to_string(),
            ));
        }

        Ok(Self {
            limits,
            state,
            high_water_mark: Decimal::ZERO,
            latest_valuation: None,
            connectivity_healthy: true,
            pending_events: Vec::new(),
        })
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn mode(&self) -> RiskMode {
        self.state.mode
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Report whether this tick got a fresh price. Unhealthy connectivity
    /// suspends authorization for the tick and freezes the stop/recovery
    /// evaluation; it never touches `mode`.
    pub fn note_connectivity(&mut self, healthy: bool) {
        self.connectivity_healthy = healthy;
    }

    /// Fold in a freshly computed snapshot; tracks the high-water mark the
    /// stop-loss is measured against.
    pub fn update_snapshot(&mut self, snapshot: &PortfolioSnapshot) {
        self.latest_valuation = Some(snapshot.valuation);
        if snapshot.valuation > self.high_water_mark {
            self.high_water_mark = snapshot.valuation;
        }
    }

    /// Run the stop/recovery state machine for this tick. Called every tick,
    /// trade or no trade.
    pub fn evaluate(&mut self, now: DateTime<Utc>) {
        self.roll_daily_window(now);

        // No fresh read this tick: valuation is stale, so neither trip nor
        // recover on it.
        if !self.connectivity_healthy {
            return;
        }

        let Some(valuation) = self.latest_valuation else {
            return;
        };

        match self.state.mode {
            RiskMode::Normal => {
                if self.high_water_mark <= Decimal::ZERO {
                    return;
                }
                let drawdown = (self.high_water_mark - valuation) / self.high_water_mark;
                if drawdown > self.limits.stop_loss_pct {
                    self.state.mode = RiskMode::EmergencyStop;
                    self.state.stop_triggered_at = Some(now);
                    self.state.stop_trigger_valuation = Some(valuation);
                    tracing::error!(
                        valuation = %valuation,
                        high_water_mark = %self.high_water_mark,
                        drawdown = %drawdown,
                        "EMERGENCY STOP triggered"
                    );
                    self.pending_events.push(RiskEvent::new(
                        RiskEventKind::EmergencyStop,
                        now,
                        format!(
                            "valuation {} down {} from high-water mark {}",
                            valuation, drawdown, self.high_water_mark
                        ),
                    ));
                }
            }
            RiskMode::EmergencyStop => {
                let (Some(triggered_at), Some(trigger_valuation)) =
                    (self.state.stop_triggered_at, self.state.stop_trigger_valuation)
                else {
                    return;
                };

                let waited_out = now - triggered_at >= self.limits.recovery_wait;
                let recovered = valuation
                    >= trigger_valuation * (Decimal::ONE + self.limits.recovery_threshold_pct);

                if waited_out && recovered {
                    self.state.mode = RiskMode::Normal;
                    self.state.stop_triggered_at = None;
                    self.state.stop_trigger_valuation = None;
                    tracing::info!(
                        valuation = %valuation,
                        trigger_valuation = %trigger_valuation,
                        "emergency stop recovered, trading resumed"
                    );
                    self.pending_events.push(RiskEvent::new(
                        RiskEventKind::Recovery,
                        now,
                        format!(
                            "valuation {} recovered from stop-trigger {}",
                            valuation, trigger_valuation
                        ),
                    ));
                }
            }
        }
    }

    /// Authorize a proposed trade, charging the daily counters on success
    /// *before* dispatch so no interleaving of authorizations can breach a
    /// cap. Use [`release`](Self::release) only for failures before
    /// broadcast.
    pub fn authorize(
        &mut self,
        proposal: &TradeProposal,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), Denial> {
        self.roll_daily_window(now);

        let denial = self.check(proposal);
        match &denial {
            Ok(()) => {
                self.state.daily_trade_count += 1;
                self.state.daily_volume += proposal.amount;
                tracing::info!(
                    side = proposal.side.as_str(),
                    amount = %proposal.amount,
                    daily_trades = self.state.daily_trade_count,
                    daily_volume = %self.state.daily_volume,
                    "trade authorized"
                );
            }
            Err(reason) => {
                tracing::warn!(
                    side = proposal.side.as_str(),
                    amount = %proposal.amount,
                    reason = reason.as_str(),
                    "trade denied"
                );
                if reason.is_limit() {
                    self.pending_events.push(RiskEvent::new(
                        RiskEventKind::LimitReached,
                        now,
                        format!(
                            "{} denied: {} (amount {})",
                            proposal.side.as_str(),
                            reason.as_str(),
                            proposal.amount
                        ),
                    ));
                }
            }
        }
        denial
    }

    fn check(&self, proposal: &TradeProposal) -> std::result::Result<(), Denial> {
        if self.state.mode == RiskMode::EmergencyStop {
            return Err(Denial::StopActive);
        }
        if !self.connectivity_healthy {
            return Err(Denial::ConnectivityHold);
        }
        if proposal.amount > self.limits.max_trade_size {
            return Err(Denial::PerTradeCap);
        }
        if self.state.daily_trade_count + 1 > self.limits.max_daily_trades {
            return Err(Denial::DailyTradeCap);
        }
        if self.state.daily_volume + proposal.amount > self.limits.max_daily_volume {
            return Err(Denial::DailyVolumeCap);
        }
        if proposal.gas_price_gwei > self.limits.max_gas_price_gwei {
            return Err(Denial::GasCeiling);
        }
        Ok(())
    }

    /// Refund counters for a submission that failed before broadcast. Never
    /// called after broadcast: a broadcast transaction may still confirm.
    pub fn release(&mut self, proposal: &TradeProposal) {
        self.state.daily_trade_count = self.state.daily_trade_count.saturating_sub(1);
        self.state.daily_volume = (self.state.daily_volume - proposal.amount).max(Decimal::ZERO);
    }

    /// Take the risk events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<RiskEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Reset the daily counters exactly once per elapsed 24h window.
    fn roll_daily_window(&mut self, now: DateTime<Utc>) {
        if now - self.state.day_window_start >= Duration::hours(24) {
            tracing::info!(
                trades = self.state.daily_trade_count,
                volume = %self.state.daily_volume,
                "daily trading counters reset"
            );
            self.state.daily_trade_count = 0;
            self.state.daily_volume = Decimal::ZERO;
            self.state.day_window_start = now;
        }
    }
}
