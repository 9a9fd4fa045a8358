use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::BotError;
use crate::risk::RiskLimits;
use crate::rpc::RpcEndpoint;
use crate::strategy::IndicatorConfig;
use crate::Result;

// Mainnet WETH and PEPE
const DEFAULT_BASE_TOKEN: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
const DEFAULT_QUOTE_TOKEN: &str = "0x6982508145454Ce325dDbE47a25d4ec3d2311933";

/// Runtime configuration, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_endpoints: Vec<RpcEndpoint>,
    pub database_url: Option<String>,
    pub signer_url: Option<String>,
    pub wallet_address: String,
    pub pool_address: String,
    pub base_token_address: String,
    pub base_token_decimals: u32,
    pub quote_token_address: String,
    pub quote_token_decimals: u32,
    /// Fraction of the portfolio valuation committed per trade.
    pub sizing_fraction: Decimal,
    pub slippage_bps: u32,
    pub gas_limit: u64,
    pub tick_secs: u64,
    /// Synthetic warm-up points generated before the first live read.
    pub warmup_points: usize,
    pub risk_limits: RiskLimits,
    pub indicators: IndicatorConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let rpc_urls = std::env::var("RPC_URLS")
            .map_err(|_| BotError::Config("RPC_URLS not set".to_string()))?;
        let rpc_endpoints = parse_endpoints(&rpc_urls)?;

        let wallet_address = std::env::var("WALLET_ADDRESS")
            .map_err(|_| BotError::Config("WALLET_ADDRESS not set".to_string()))?;
        validate_address(&wallet_address)?;

        let pool_address = std::env::var("POOL_ADDRESS")
            .map_err(|_| BotError::Config("POOL_ADDRESS not set".to_string()))?;
        validate_address(&pool_address)?;

        let base_token_address =
            std::env::var("BASE_TOKEN_ADDRESS").unwrap_or_else(|_| DEFAULT_BASE_TOKEN.to_string());
        validate_address(&base_token_address)?;
        let quote_token_address = std::env::var("QUOTE_TOKEN_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_QUOTE_TOKEN.to_string());
        validate_address(&quote_token_address)?;

        Ok(Self {
            rpc_endpoints,
            database_url: std::env::var("DATABASE_URL").ok(),
            signer_url: std::env::var("SIGNER_URL").ok(),
            wallet_address,
            pool_address,
            base_token_address,
            base_token_decimals: env_parse("BASE_TOKEN_DECIMALS", 18)?,
            quote_token_address,
            quote_token_decimals: env_parse("QUOTE_TOKEN_DECIMALS", 18)?,
            sizing_fraction: env_decimal("TRADE_SIZING_FRACTION", dec!(0.15))?,
            slippage_bps: env_parse("SLIPPAGE_BPS", 50)?,
            gas_limit: env_parse("GAS_LIMIT", 300_000)?,
            tick_secs: env_parse("TICK_SECS", 60)?,
            warmup_points: env_parse("WARMUP_POINTS", 40)?,
            risk_limits: risk_limits_from_env()?,
            indicators: indicators_from_env()?,
        })
    }
}

fn risk_limits_from_env() -> Result<RiskLimits> {
    let defaults = RiskLimits::default();
    Ok(RiskLimits {
        max_trade_size: env_decimal("MAX_TRADE_SIZE", defaults.max_trade_size)?,
        max_daily_trades: env_parse("MAX_DAILY_TRADES", defaults.max_daily_trades)?,
        max_daily_volume: env_decimal("MAX_DAILY_VOLUME", defaults.max_daily_volume)?,
        max_gas_price_gwei: env_decimal("MAX_GAS_PRICE_GWEI", defaults.max_gas_price_gwei)?,
        stop_loss_pct: env_decimal("STOP_LOSS_PCT", defaults.stop_loss_pct)?,
        recovery_threshold_pct: env_decimal(
            "RECOVERY_THRESHOLD_PCT",
            defaults.recovery_threshold_pct,
        )?,
        recovery_wait: Duration::seconds(env_parse(
            "RECOVERY_WAIT_SECS",
            defaults.recovery_wait.num_seconds(),
        )?),
    })
}

fn indicators_from_env() -> Result<IndicatorConfig> {
    let defaults = IndicatorConfig::default();
    Ok(IndicatorConfig {
        short_sma: env_parse("SHORT_SMA", defaults.short_sma)?,
        long_sma: env_parse("LONG_SMA", defaults.long_sma)?,
        rsi_period: env_parse("RSI_PERIOD", defaults.rsi_period)?,
        rsi_oversold: env_decimal("RSI_OVERSOLD", defaults.rsi_oversold)?,
        rsi_overbought: env_decimal("RSI_OVERBOUGHT", defaults.rsi_overbought)?,
        macd_fast: env_parse("MACD_FAST", defaults.macd_fast)?,
        macd_slow: env_parse("MACD_SLOW", defaults.macd_slow)?,
        macd_signal: env_parse("MACD_SIGNAL", defaults.macd_signal)?,
        history_capacity: env_parse("HISTORY_CAPACITY", defaults.history_capacity)?,
    })
}

/// Split a comma-separated URL list into endpoints with stable ids.
pub fn parse_endpoints(raw: &str) -> Result<Vec<RpcEndpoint>> {
    let endpoints: Vec<RpcEndpoint> = raw
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .enumerate()
        .map(|(i, url)| RpcEndpoint::new(format!("rpc-{}", i + 1), url))
        .collect();

    if endpoints.is_empty() {
        return Err(BotError::Config(
            "RPC_URLS contained no endpoints".to_string(),
        ));
    }
    Ok(endpoints)
}

fn validate_address(address: &str) -> Result<()> {
    let valid = address
        .strip_prefix("0x")
        .map(|bare| bare.len() == 40 && bare.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false);
    if !valid {
        return Err(BotError::Config(format!("malformed address: {address}")));
    }
    Ok(())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| BotError::Config(format!("{key} is not valid: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| BotError::Config(format!("{key} is not a valid decimal: {raw}"))),
        Err(_) => Ok(default),
    }
}
