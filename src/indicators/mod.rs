// Technical indicators module
// Pure functions over price slices; insufficient data returns None, never an error

pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use macd::{calculate_macd, MacdPoint};
pub use moving_average::{calculate_ema, calculate_sma, ema_series};
pub use rsi::calculate_rsi;
