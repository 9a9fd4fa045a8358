use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single observed pool price.
///
/// Prices are `Decimal` end to end — monetary values never touch floating
/// point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    /// Which upstream endpoint served this read.
    pub endpoint_id: String,
}

/// Trading signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Per-indicator vote breakdown, kept alongside the aggregated decision for
/// tie-break auditing. Immutable once computed for a tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndicatorVotes {
    pub sma: Signal,
    pub rsi: Signal,
    pub macd: Signal,
}

impl IndicatorVotes {
    pub fn hold() -> Self {
        Self {
            sma: Signal::Hold,
            rsi: Signal::Hold,
            macd: Signal::Hold,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Signal> {
        [self.sma, self.rsi, self.macd].into_iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        }
    }
}

/// Terminal states are final: outcome only ever moves
/// Pending -> {Confirmed, Failed, Reverted}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeOutcome {
    Pending,
    Confirmed,
    Failed,
    Reverted,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Pending => "Pending",
            TradeOutcome::Confirmed => "Confirmed",
            TradeOutcome::Failed => "Failed",
            TradeOutcome::Reverted => "Reverted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeOutcome::Pending)
    }
}

/// Append-only ledger entry for one swap attempt. Created on submission,
/// mutated only by the verification step, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub side: TradeSide,
    /// Amount requested, in base-asset units.
    pub requested_amount: Decimal,
    /// Filled only once confirmed with on-chain evidence.
    pub executed_amount: Option<Decimal>,
    pub gas_price_gwei: Decimal,
    pub gas_limit: u64,
    /// None when the signer rejected the transaction before broadcast.
    pub tx_hash: Option<String>,
    pub outcome: TradeOutcome,
    pub submitted_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Dry-run fills are recorded in the same ledger, flagged.
    pub simulated: bool,
}

impl TradeRecord {
    pub fn new(
        side: TradeSide,
        requested_amount: Decimal,
        gas_price_gwei: Decimal,
        gas_limit: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            side,
            requested_amount,
            executed_amount: None,
            gas_price_gwei,
            gas_limit,
            tx_hash: None,
            outcome: TradeOutcome::Pending,
            submitted_at: Utc::now(),
            confirmed_at: None,
            simulated: false,
        }
    }

    /// Transition to Confirmed. No-op if the outcome is already terminal.
    pub fn confirm(&mut self, executed_amount: Decimal, at: DateTime<Utc>) {
        if self.outcome == TradeOutcome::Pending {
            self.outcome = TradeOutcome::Confirmed;
            self.executed_amount = Some(executed_amount);
            self.confirmed_at = Some(at);
        }
    }

    /// Transition to Failed. No-op if the outcome is already terminal.
    pub fn fail(&mut self) {
        if self.outcome == TradeOutcome::Pending {
            self.outcome = TradeOutcome::Failed;
        }
    }

    /// Transition to Reverted. No-op if the outcome is already terminal.
    pub fn revert(&mut self, at: DateTime<Utc>) {
        if self.outcome == TradeOutcome::Pending {
            self.outcome = TradeOutcome::Reverted;
            self.confirmed_at = Some(at);
        }
    }
}

/// Point-in-time portfolio view. Valuation is denominated in the base asset,
/// the same unit as the stop-loss threshold. Published wholesale; readers
/// never see a partially updated record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    /// Base asset (e.g. WETH) balance.
    pub base_balance: Decimal,
    /// Quote token (the traded token) balance.
    pub quote_balance: Decimal,
    /// base_balance + quote_balance * price, in base-asset units.
    pub valuation: Decimal,
    pub as_of: DateTime<Utc>,
}

impl PortfolioSnapshot {
    pub fn new(
        base_balance: Decimal,
        quote_balance: Decimal,
        price: Decimal,
        as_of: DateTime<Utc>,
    ) -> Self {
        Self {
            base_balance,
            quote_balance,
            valuation: base_balance + quote_balance * price,
            as_of,
        }
    }
}

/// Trading mode of the safety state machine. Transitions only
/// Normal -> EmergencyStop -> Normal, never skipping states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskMode {
    Normal,
    EmergencyStop,
}

impl RiskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskMode::Normal => "Normal",
            RiskMode::EmergencyStop => "EmergencyStop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Normal" => Some(RiskMode::Normal),
            "EmergencyStop" => Some(RiskMode::EmergencyStop),
            _ => None,
        }
    }
}

/// The one process-wide finite-state record. Persisted so daily caps and an
/// active stop survive a mid-day restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    pub mode: RiskMode,
    pub stop_triggered_at: Option<DateTime<Utc>>,
    pub stop_trigger_valuation: Option<Decimal>,
    pub daily_trade_count: u32,
    pub daily_volume: Decimal,
    pub day_window_start: DateTime<Utc>,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            mode: RiskMode::Normal,
            stop_triggered_at: None,
            stop_trigger_valuation: None,
            daily_trade_count: 0,
            daily_volume: Decimal::ZERO,
            day_window_start: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskEventKind {
    EmergencyStop,
    Recovery,
    LimitReached,
}

impl RiskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskEventKind::EmergencyStop => "EmergencyStop",
            RiskEventKind::Recovery => "Recovery",
            RiskEventKind::LimitReached => "LimitReached",
        }
    }
}

/// Append-only audit trail entry for post-mortem analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub id: Uuid,
    pub kind: RiskEventKind,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

impl RiskEvent {
    pub fn new(kind: RiskEventKind, timestamp: DateTime<Utc>, context: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp,
            context: context.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_outcome_is_monotonic() {
        let mut record = TradeRecord::new(TradeSide::Buy, dec!(0.01), dec!(30), 300_000);
        assert_eq!(record.outcome, TradeOutcome::Pending);

        record.fail();
        assert_eq!(record.outcome, TradeOutcome::Failed);

        // A terminal outcome never moves backward
        record.confirm(dec!(0.01), Utc::now());
        assert_eq!(record.outcome, TradeOutcome::Failed);
        assert!(record.executed_amount.is_none());

        record.revert(Utc::now());
        assert_eq!(record.outcome, TradeOutcome::Failed);
    }

    #[test]
    fn test_confirm_records_evidence() {
        let mut record = TradeRecord::new(TradeSide::Sell, dec!(0.5), dec!(25), 300_000);
        let at = Utc::now();
        record.confirm(dec!(0.497), at);

        assert_eq!(record.outcome, TradeOutcome::Confirmed);
        assert_eq!(record.executed_amount, Some(dec!(0.497)));
        assert_eq!(record.confirmed_at, Some(at));
    }

    #[test]
    fn test_snapshot_valuation_in_base_units() {
        let snap = PortfolioSnapshot::new(dec!(1.0), dec!(1000000), dec!(0.000001), Utc::now());
        assert_eq!(snap.valuation, dec!(2.0));
    }

    #[test]
    fn test_risk_mode_round_trip() {
        assert_eq!(RiskMode::parse("Normal"), Some(RiskMode::Normal));
        assert_eq!(
            RiskMode::parse(RiskMode::EmergencyStop.as_str()),
            Some(RiskMode::EmergencyStop)
        );
        assert_eq!(RiskMode::parse("Panicking"), None);
    }
}
