use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::indicators::{calculate_macd, calculate_rsi, calculate_sma};
use crate::models::{IndicatorVotes, PricePoint, Signal};

/// Indicator windows and thresholds.
#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    pub short_sma: usize,
    pub long_sma: usize,
    pub rsi_period: usize,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    /// History horizon in points; oldest evicted past this.
    pub history_capacity: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            short_sma: 3,
            long_sma: 8,
            rsi_period: 5,
            rsi_oversold: dec!(35),
            rsi_overbought: dec!(65),
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            history_capacity: 96,
        }
    }
}

impl IndicatorConfig {
    /// Points needed before every indicator can vote a direction.
    pub fn min_points(&self) -> usize {
        (self.long_sma + 1)
            .max(self.rsi_period + 1)
            .max(self.macd_slow + self.macd_signal)
    }
}

/// Rolling price window plus the three indicator votes.
///
/// The votes are pure functions of the window — there is no hidden state
/// beyond the history itself, so each indicator is testable with a synthetic
/// price sequence.
#[derive(Debug)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    history: VecDeque<PricePoint>,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a fresh observation, evicting the oldest once past capacity.
    pub fn push(&mut self, point: PricePoint) {
        self.history.push_back(point);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.history.back()
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute the per-indicator votes for the current window. Insufficient
    /// data is a neutral HOLD vote, not an error.
    pub fn compute(&self) -> IndicatorVotes {
        let prices: Vec<Decimal> = self.history.iter().map(|p| p.price).collect();

        IndicatorVotes {
            sma: self.sma_vote(&prices),
            rsi: self.rsi_vote(&prices),
            macd: self.macd_vote(&prices),
        }
    }

    /// BUY when the short SMA crosses above the long one on the latest
    /// point, SELL on the cross below.
    fn sma_vote(&self, prices: &[Decimal]) -> Signal {
        if prices.len() < self.config.long_sma + 1 {
            return Signal::Hold;
        }

        let prev = &prices[..prices.len() - 1];
        let (Some(short_prev), Some(long_prev), Some(short_now), Some(long_now)) = (
            calculate_sma(prev, self.config.short_sma),
            calculate_sma(prev, self.config.long_sma),
            calculate_sma(prices, self.config.short_sma),
            calculate_sma(prices, self.config.long_sma),
        ) else {
            return Signal::Hold;
        };

        if short_prev <= long_prev && short_now > long_now {
            Signal::Buy
        } else if short_prev >= long_prev && short_now < long_now {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    fn rsi_vote(&self, prices: &[Decimal]) -> Signal {
        match calculate_rsi(prices, self.config.rsi_period) {
            Some(rsi) if rsi < self.config.rsi_oversold => Signal::Buy,
            Some(rsi) if rsi > self.config.rsi_overbought => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    fn macd_vote(&self, prices: &[Decimal]) -> Signal {
        let Some((prev, last)) = calculate_macd(
            prices,
            self.config.macd_fast,
            self.config.macd_slow,
            self.config.macd_signal,
        ) else {
            return Signal::Hold;
        };

        if prev.macd <= prev.signal && last.macd > last.signal {
            Signal::Buy
        } else if prev.macd >= prev.signal && last.macd < last.signal {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}
