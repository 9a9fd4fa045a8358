use rust_decimal::Decimal;

/// Calculate Relative Strength Index (RSI) with Wilder smoothing
///
/// The first `period` price changes seed the average gain/loss; every later
/// change is folded in with the Wilder recursion
/// `avg = (avg * (period - 1) + change) / period`.
///
/// Values:
/// - RSI > overbought threshold: sell territory
/// - RSI < oversold threshold: buy territory
pub fn calculate_rsi(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    for window in prices.windows(2) {
        let change = window[1] - window[0];
        if change > Decimal::ZERO {
            gains.push(change);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-change);
        }
    }

    let period_dec = Decimal::from(period as u64);

    // Seed averages over the first window of changes
    let mut avg_gain: Decimal = gains[..period].iter().sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = losses[..period].iter().sum::<Decimal>() / period_dec;

    // Wilder smoothing over the remainder
    let weight = Decimal::from(period as u64 - 1);
    for i in period..gains.len() {
        avg_gain = (avg_gain * weight + gains[i]) / period_dec;
        avg_loss = (avg_loss * weight + losses[i]) / period_dec;
    }

    if avg_loss == Decimal::ZERO {
        return Some(Decimal::ONE_HUNDRED);
    }

    let rs = avg_gain / avg_loss;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rsi_in_valid_range() {
        let prices = vec![
            dec!(44.0),
            dec!(44.25),
            dec!(44.5),
            dec!(43.75),
            dec!(44.0),
            dec!(44.5),
            dec!(45.0),
            dec!(45.5),
            dec!(45.25),
            dec!(45.5),
            dec!(46.0),
            dec!(46.5),
            dec!(46.25),
            dec!(46.0),
            dec!(46.5),
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > Decimal::ZERO && rsi < Decimal::ONE_HUNDRED);
        // Mostly gains in this window, so RSI should lean high
        assert!(rsi > dec!(50));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![dec!(100), dec!(102), dec!(101)];
        assert!(calculate_rsi(&prices, 14).is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![dec!(100), dec!(101), dec!(102), dec!(103), dec!(104), dec!(105)];
        assert_eq!(calculate_rsi(&prices, 5), Some(Decimal::ONE_HUNDRED));
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let prices = vec![dec!(105), dec!(104), dec!(103), dec!(102), dec!(101), dec!(100)];
        assert_eq!(calculate_rsi(&prices, 5), Some(Decimal::ZERO));
    }
}
