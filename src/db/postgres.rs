use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::error::BotError;
use crate::models::{PortfolioSnapshot, RiskEvent, RiskMode, RiskState, TradeRecord};
use crate::Result;

/// Fixed key for the single risk-state row.
const RISK_STATE_ID: &str = "current";

/// Postgres persistence: trade ledger, risk audit trail, portfolio history,
/// and the persisted risk state.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run pending migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    /// Upsert a trade record. Terminal outcomes overwrite the Pending row
    /// written at submission time.
    pub async fn save_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, side, requested_amount, executed_amount, gas_price_gwei,
                gas_limit, tx_hash, outcome, submitted_at, confirmed_at, simulated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                executed_amount = EXCLUDED.executed_amount,
                tx_hash = EXCLUDED.tx_hash,
                outcome = EXCLUDED.outcome,
                confirmed_at = EXCLUDED.confirmed_at,
                updated_at = NOW()
            "#,
        )
        .bind(trade.id)
        .bind(trade.side.as_str())
        .bind(trade.requested_amount)
        .bind(trade.executed_amount)
        .bind(trade.gas_price_gwei)
        .bind(trade.gas_limit as i64)
        .bind(&trade.tx_hash)
        .bind(trade.outcome.as_str())
        .bind(trade.submitted_at)
        .bind(trade.confirmed_at)
        .bind(trade.simulated)
        .execute(&self.pool)
        .await?;

        tracing::debug!(trade_id = %trade.id, outcome = trade.outcome.as_str(), "saved trade");
        Ok(())
    }

    /// Append a risk event to the audit trail.
    pub async fn save_risk_event(&self, event: &RiskEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_events (id, kind, occurred_at, context)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.kind.as_str())
        .bind(event.timestamp)
        .bind(&event.context)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append a portfolio snapshot to the history.
    pub async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshots (base_balance, quote_balance, valuation, as_of)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(snapshot.base_balance)
        .bind(snapshot.quote_balance)
        .bind(snapshot.valuation)
        .bind(snapshot.as_of)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite the single persisted risk-state row.
    pub async fn save_risk_state(&self, state: &RiskState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_state (
                id, mode, stop_triggered_at, stop_trigger_valuation,
                daily_trade_count, daily_volume, day_window_start
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                mode = EXCLUDED.mode,
                stop_triggered_at = EXCLUDED.stop_triggered_at,
                stop_trigger_valuation = EXCLUDED.stop_trigger_valuation,
                daily_trade_count = EXCLUDED.daily_trade_count,
                daily_volume = EXCLUDED.daily_volume,
                day_window_start = EXCLUDED.day_window_start,
                updated_at = NOW()
            "#,
        )
        .bind(RISK_STATE_ID)
        .bind(state.mode.as_str())
        .bind(state.stop_triggered_at)
        .bind(state.stop_trigger_valuation)
        .bind(state.daily_trade_count as i32)
        .bind(state.daily_volume)
        .bind(state.day_window_start)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the persisted risk state, if any. A row that fails validation
    /// is `CorruptRiskState`, which the caller treats as fatal.
    pub async fn load_risk_state(&self) -> Result<Option<RiskState>> {
        let row = sqlx::query(
            r#"
            SELECT mode, stop_triggered_at, stop_trigger_valuation,
                   daily_trade_count, daily_volume, day_window_start
            FROM risk_state
            WHERE id = $1
            "#,
        )
        .bind(RISK_STATE_ID)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mode_str: String = row.get("mode");
        let mode = RiskMode::parse(&mode_str)
            .ok_or_else(|| BotError::CorruptRiskState(format!("unknown mode: {mode_str}")))?;

        let daily_trade_count: i32 = row.get("daily_trade_count");
        if daily_trade_count < 0 {
            return Err(BotError::CorruptRiskState(format!(
                "negative daily trade count: {daily_trade_count}"
            )));
        }

        let stop_triggered_at: Option<DateTime<Utc>> = row.get("stop_triggered_at");
        let stop_trigger_valuation: Option<Decimal> = row.get("stop_trigger_valuation");

        Ok(Some(RiskState {
            mode,
            stop_triggered_at,
            stop_trigger_valuation,
            daily_trade_count: daily_trade_count as u32,
            daily_volume: row.get("daily_volume"),
            day_window_start: row.get("day_window_start"),
        }))
    }
}
