use rust_decimal::Decimal;

/// Calculate Simple Moving Average (SMA) over the most recent `period` prices
pub fn calculate_sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: Decimal = prices.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u64))
}

/// Calculate Exponential Moving Average (EMA), seeded with the SMA of the
/// first `period` prices
pub fn calculate_ema(prices: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(prices, period).and_then(|s| s.last().copied())
}

/// Full EMA series. Entry `i` corresponds to `prices[i + period - 1]`, so the
/// series has `prices.len() - period + 1` entries.
pub fn ema_series(prices: &[Decimal], period: usize) -> Option<Vec<Decimal>> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = Decimal::TWO / Decimal::from(period as u64 + 1);

    // Seed with SMA of the first window
    let seed: Decimal = prices[..period].iter().sum::<Decimal>() / Decimal::from(period as u64);

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(seed);

    let mut ema = seed;
    for price in &prices[period..] {
        ema = (*price - ema) * multiplier + ema;
        series.push(ema);
    }

    Some(series)
}
