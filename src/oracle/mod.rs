//! Price sourcing: the live pool read, and a synthetic random-walk
//! backfill used to warm the indicator window before real data exists.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;

use crate::error::BotError;
use crate::models::PricePoint;
use crate::rpc::RpcClient;
use crate::Result;

/// Anything the trading loop can pull a fresh price from.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self) -> Result<PricePoint>;

    /// Called at the top of every loop tick, before any reads.
    async fn begin_tick(&self) {}
}

/// Endpoint id stamped on backfilled points so downstream consumers can
/// tell them from live reads.
pub const SYNTHETIC_ENDPOINT_ID: &str = "synthetic";

/// Reads the spot price from a pool contract.
pub struct PriceOracle {
    client: RpcClient,
    pool_address: String,
}

impl PriceOracle {
    pub fn new(client: RpcClient, pool_address: impl Into<String>) -> Self {
        Self {
            client,
            pool_address: pool_address.into(),
        }
    }

    /// Fetch the current pool price, tagged with the endpoint that served
    /// it. A non-positive price is corrupt pool data, never a quote.
    pub async fn current_price(&self) -> Result<PricePoint> {
        let (endpoint_id, price) = self.client.pool_price(&self.pool_address).await?;
        if price <= Decimal::ZERO {
            return Err(BotError::Decode(format!(
                "pool {} quoted non-positive price {price}",
                self.pool_address
            )));
        }
        Ok(PricePoint {
            timestamp: Utc::now(),
            price,
            endpoint_id,
        })
    }
}

#[async_trait]
impl PriceSource for PriceOracle {
    async fn fetch_price(&self) -> Result<PricePoint> {
        self.current_price().await
    }

    async fn begin_tick(&self) {
        self.client.begin_tick().await;
    }
}

/// Generate a random-walk price history ending just before `now`.
///
/// Each step moves the previous price by a uniform amount within
/// `max_step_bps` basis points. The walk stays strictly positive. Used only
/// to warm the indicator window; trades still wait for live reads.
pub fn synthetic_history(
    seed_price: Decimal,
    points: usize,
    interval: Duration,
    max_step_bps: i64,
    now: DateTime<Utc>,
) -> Vec<PricePoint> {
    let mut rng = rand::thread_rng();
    let mut price = seed_price.max(Decimal::new(1, 12));
    let mut history = Vec::with_capacity(points);

    for i in 0..points {
        let bps = rng.gen_range(-max_step_bps..=max_step_bps);
        let next = price * (Decimal::ONE + Decimal::new(bps, 4));
        if next > Decimal::ZERO {
            price = next;
        }
        let offset = interval * (points - i) as i32;
        history.push(PricePoint {
            timestamp: now - offset,
            price,
            endpoint_id: SYNTHETIC_ENDPOINT_ID.to_string(),
        });
    }

    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_synthetic_history_shape() {
        let now = Utc::now();
        let history = synthetic_history(dec!(0.0000012), 40, Duration::minutes(15), 50, now);

        assert_eq!(history.len(), 40);
        assert!(history.iter().all(|p| p.price > Decimal::ZERO));
        assert!(history
            .iter()
            .all(|p| p.endpoint_id == SYNTHETIC_ENDPOINT_ID));
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(history.last().unwrap().timestamp < now);
    }

    #[test]
    fn test_synthetic_history_bounded_steps() {
        let now = Utc::now();
        let history = synthetic_history(dec!(100), 200, Duration::minutes(1), 50, now);

        for w in history.windows(2) {
            let ratio = w[1].price / w[0].price;
            assert!(ratio >= dec!(0.995) && ratio <= dec!(1.005));
        }
    }

    #[test]
    fn test_synthetic_history_zero_points() {
        assert!(synthetic_history(dec!(1), 0, Duration::minutes(1), 50, Utc::now()).is_empty());
    }
}
