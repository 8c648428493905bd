//! Configuration surface. Loaded from a TOML file (overridable with
//! `--config`) layered with `SPOTBOT_`-prefixed environment variables via
//! the `config` crate. `.env` files are picked up by `dotenvy` before the
//! layered load so `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET` /
//! `SANDBOX_MODE` can live outside version control.

use crate::error::BotError;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "spotbot", version, about = "Live spot-trading engine")]
pub struct Cli {
    /// Run the trading orchestrator against the configured exchange.
    #[arg(long)]
    pub live: bool,

    /// Override the default config file location.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// All of --live, but order-placing gateway methods become no-ops that
    /// log the intended order instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionAdoptionPolicy {
    Adopt,
    Ignore,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub name: String,
    #[serde(default)]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    pub atr_min: f64,
    pub atr_max: f64,
    pub vol_ratio_min: f64,
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_cci_bound")]
    pub cci_bound: f64,
}

fn default_trend_lookback() -> usize {
    5
}
fn default_rsi_overbought() -> f64 {
    75.0
}
fn default_rsi_oversold() -> f64 {
    25.0
}
fn default_cci_bound() -> f64 {
    200.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default)]
    pub flatten_on_exit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub exchange: ExchangeConfig,
    pub symbol: String,
    pub timeframe_feed: String,
    pub timeframe_strategy: String,
    pub cycle_period_seconds: u64,
    pub risk_per_trade: f64,
    pub max_concurrent_trades: usize,
    pub sl_atr_multiplier: f64,
    pub tp_atr_multiplier: f64,
    pub trail_activation_profit_frac: f64,
    pub trail_retrace_frac: f64,
    pub conf_threshold: f64,
    pub filters: FilterConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    pub min_lot_size: rust_decimal::Decimal,
    pub min_notional: rust_decimal::Decimal,
    pub qty_step: rust_decimal::Decimal,
    pub tick_size: rust_decimal::Decimal,
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer: f64,
    #[serde(default)]
    pub position_adoption: Option<PositionAdoptionPolicy>,
}

fn default_fee_buffer() -> f64 {
    0.001
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig { flatten_on_exit: false }
    }
}

impl BotConfig {
    /// Resolution order: layered `config.toml` (or the `--config` override)
    /// then `SPOTBOT_`-prefixed environment variables, highest priority
    /// last. Credentials are read directly from `EXCHANGE_API_KEY` /
    /// `EXCHANGE_API_SECRET` at gateway construction time, never stored on
    /// this struct.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, BotError> {
        let _ = dotenvy::dotenv(); // optional; fine if no .env present

        let default_path = PathBuf::from("config.toml");
        let config_path = path.map(PathBuf::from).unwrap_or(default_path);

        let builder = config::Config::builder()
            .add_source(config::File::from(config_path.as_path()).required(false))
            .add_source(config::Environment::with_prefix("SPOTBOT").separator("__"));

        let raw = builder
            .build()
            .map_err(|e| BotError::Config(format!("failed to build config: {e}")))?;

        raw.try_deserialize::<BotConfig>()
            .map_err(|e| BotError::Config(format!("failed to parse config: {e}")))
    }

    pub fn effective_adoption_policy(&self) -> PositionAdoptionPolicy {
        self.position_adoption.unwrap_or(if self.exchange.sandbox {
            PositionAdoptionPolicy::Adopt
        } else {
            PositionAdoptionPolicy::Ignore
        })
    }

    /// `timeframe_strategy` must be an integer multiple of `timeframe_feed`
    /// in minutes.
    pub fn aggregation_ratio(&self) -> Result<usize, BotError> {
        let feed: usize = self
            .timeframe_feed
            .parse()
            .map_err(|_| BotError::Config(format!("bad timeframe_feed: {}", self.timeframe_feed)))?;
        let strat: usize = self
            .timeframe_strategy
            .parse()
            .map_err(|_| BotError::Config(format!("bad timeframe_strategy: {}", self.timeframe_strategy)))?;
        if feed == 0 || strat % feed != 0 {
            return Err(BotError::Config(format!(
                "timeframe_strategy ({strat}) must be an integer multiple of timeframe_feed ({feed})"
            )));
        }
        Ok(strat / feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_adoption_policy_follows_sandbox() {
        let mut cfg = sample_config();
        cfg.exchange.sandbox = true;
        cfg.position_adoption = None;
        assert_eq!(cfg.effective_adoption_policy(), PositionAdoptionPolicy::Adopt);

        cfg.exchange.sandbox = false;
        assert_eq!(cfg.effective_adoption_policy(), PositionAdoptionPolicy::Ignore);
    }

    #[test]
    fn explicit_adoption_policy_overrides_sandbox_default() {
        let mut cfg = sample_config();
        cfg.exchange.sandbox = true;
        cfg.position_adoption = Some(PositionAdoptionPolicy::Ignore);
        assert_eq!(cfg.effective_adoption_policy(), PositionAdoptionPolicy::Ignore);
    }

    #[test]
    fn aggregation_ratio_rejects_non_multiple() {
        let mut cfg = sample_config();
        cfg.timeframe_feed = "5".into();
        cfg.timeframe_strategy = "12".into();
        assert!(cfg.aggregation_ratio().is_err());
    }

    #[test]
    fn aggregation_ratio_computes_multiple() {
        let mut cfg = sample_config();
        cfg.timeframe_feed = "5".into();
        cfg.timeframe_strategy = "15".into();
        assert_eq!(cfg.aggregation_ratio().unwrap(), 3);
    }

    fn sample_config() -> BotConfig {
        BotConfig {
            exchange: ExchangeConfig { name: "binance".into(), sandbox: true },
            symbol: "BTCUSDT".into(),
            timeframe_feed: "5".into(),
            timeframe_strategy: "15".into(),
            cycle_period_seconds: 30,
            risk_per_trade: 0.02,
            max_concurrent_trades: 1,
            sl_atr_multiplier: 2.0,
            tp_atr_multiplier: 4.0,
            trail_activation_profit_frac: 0.01,
            trail_retrace_frac: 0.01,
            conf_threshold: 0.1,
            filters: FilterConfig {
                atr_min: 0.0015,
                atr_max: 0.15,
                vol_ratio_min: 1.0,
                trend_lookback: 5,
                rsi_overbought: 75.0,
                rsi_oversold: 25.0,
                cci_bound: 200.0,
            },
            model: ModelConfig { path: PathBuf::from("model") },
            shutdown: ShutdownConfig::default(),
            min_lot_size: rust_decimal::Decimal::new(1, 3),
            min_notional: rust_decimal::Decimal::new(10, 0),
            qty_step: rust_decimal::Decimal::new(1, 3),
            tick_size: rust_decimal::Decimal::new(1, 2),
            fee_buffer: 0.001,
            position_adoption: None,
        }
    }
}
