use rust_decimal::Decimal;

use crate::indicators::ema_series;

/// One point of the MACD line with its signal-line value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: Decimal,
    pub signal: Decimal,
}

/// Calculate MACD (fast/slow EMA difference) and its signal-line EMA.
///
/// Returns the previous and latest points so callers can detect a
/// signal-line crossover. Needs at least `slow + signal_period` prices for
/// two signal-line values; fewer returns None.
pub fn calculate_macd(
    prices: &[Decimal],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<(MacdPoint, MacdPoint)> {
    if fast == 0 || slow <= fast || signal_period == 0 || prices.len() < slow + signal_period {
        return None;
    }

    let fast_series = ema_series(prices, fast)?;
    let slow_series = ema_series(prices, slow)?;

    // Both series end at the latest price; align them from the tail. The
    // MACD line exists wherever the slow EMA does.
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<Decimal> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_ema)| fast_series[i + offset] - slow_ema)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period)?;
    if signal_series.len() < 2 {
        return None;
    }

    let last = MacdPoint {
        macd: macd_line[macd_line.len() - 1],
        signal: signal_series[signal_series.len() - 1],
    };
    let prev = MacdPoint {
        macd: macd_line[macd_line.len() - 2],
        signal: signal_series[signal_series.len() - 2],
    };

    Some((prev, last))
}
