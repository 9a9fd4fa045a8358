use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::TradeSide;

/// Hard limits enforced on every authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Per-trade cap in base-asset units.
    pub max_trade_size: Decimal,
    pub max_daily_trades: u32,
    /// Daily cumulative volume cap in base-asset units.
    pub max_daily_volume: Decimal,
    pub max_gas_price_gwei: Decimal,
    /// Fractional drop from the valuation high-water mark that trips the
    /// emergency stop (0.20 = 20%).
    pub stop_loss_pct: Decimal,
    /// Fractional recovery above the stop-trigger valuation required before
    /// trading resumes.
    pub recovery_threshold_pct: Decimal,
    /// Minimum time in EMERGENCY_STOP before recovery is even considered.
    #[serde(with = "duration_secs")]
    pub recovery_wait: Duration,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_trade_size: dec!(0.01),
            max_daily_trades: 50,
            max_daily_volume: dec!(10.0),
            max_gas_price_gwei: dec!(200),
            stop_loss_pct: dec!(0.20),
            recovery_threshold_pct: dec!(0.05),
            recovery_wait: Duration::hours(2),
        }
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::seconds(i64::deserialize(d)?))
    }
}

/// A trade the loop wants to place, as seen by the risk manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeProposal {
    pub side: TradeSide,
    /// Base-asset units.
    pub amount: Decimal,
    pub gas_price_gwei: Decimal,
}

/// Every denial reason is distinct so post-mortems can tell which limit bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// Emergency stop is active; everything is denied until recovery.
    StopActive,
    /// Price/connectivity channel was unavailable this tick. Trading is
    /// suspended for the tick only; the stop state machine is untouched.
    ConnectivityHold,
    PerTradeCap,
    DailyTradeCap,
    DailyVolumeCap,
    GasCeiling,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::StopActive => "emergency stop active",
            Denial::ConnectivityHold => "connectivity hold",
            Denial::PerTradeCap => "per-trade size cap",
            Denial::DailyTradeCap => "daily trade count cap",
            Denial::DailyVolumeCap => "daily volume cap",
            Denial::GasCeiling => "gas price ceiling",
        }
    }

    /// Limit denials are audited as LIMIT_REACHED risk events. StopActive
    /// and ConnectivityHold are not: the former would spam the trail past
    /// the initial stop event, the latter is a per-tick condition already
    /// on the log.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Denial::PerTradeCap | Denial::DailyTradeCap | Denial::DailyVolumeCap | Denial::GasCeiling
        )
    }
}
