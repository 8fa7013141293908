use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::order::OrderKind;

/// Top-level `config.yaml` tree.
///
/// Grounded on `cryptotrader.commands.execute.App._get_exchanges`/
/// `_get_strategies`: the original reads its whole config as a loose
/// dict and picks fields out of it by hand. This port gives that same
/// shape a `serde`-deserializable type, the way the teacher's
/// `MmEngineConfig`/`MmAssetConfig` are typed rather than stringly-keyed.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub dsn: String,
    pub app: AppConfig,
    pub default_exchange: DefaultVenueConfig,
    pub exchanges: HashMap<String, VenueConfig>,
    pub strategies: StrategiesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub interval_secs: u64,
}

impl AppConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultVenueConfig {
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub limit: f64,
    #[serde(default)]
    pub pair_limits: HashMap<String, f64>,
    #[serde(default = "default_pair_name_template")]
    pub pair_name_template: String,
    #[serde(default = "default_fetch_balances_interval_secs")]
    pub fetch_balances_interval_secs: u64,
    #[serde(default = "default_update_tickers_interval_secs")]
    pub update_tickers_interval_secs: u64,
    #[serde(default = "default_update_tickers_timeout_secs")]
    pub update_tickers_timeout_secs: u64,
    #[serde(default = "default_subscribe_on_pairs_delay_ms")]
    pub subscribe_on_pairs_delay_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_pair_name_template() -> String {
    "{quote}{base}".to_string()
}

fn default_fetch_balances_interval_secs() -> u64 {
    60
}

fn default_update_tickers_interval_secs() -> u64 {
    10
}

fn default_update_tickers_timeout_secs() -> u64 {
    5
}

fn default_subscribe_on_pairs_delay_ms() -> u64 {
    500
}

fn default_interval_secs() -> u64 {
    10
}

fn default_rate_limit() -> u32 {
    10
}

fn default_rate_limit_period_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_limit_period_secs")]
    pub period_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            limit: default_rate_limit(),
            period_secs: default_rate_limit_period_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// One `exchanges.<name>` entry. Per-venue overrides fall back to
/// [`DefaultVenueConfig`]'s values where absent, mirroring the original's
/// `{**default_exchange_config, **exchanges_config[name]}` dict merge.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub transport: TransportConfig,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub pair_limits: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub pair_name_template: Option<String>,
    #[serde(default)]
    pub default_pairs: Vec<String>,
    #[serde(default)]
    pub fetch_balances_interval_secs: Option<u64>,
    #[serde(default)]
    pub update_tickers_interval_secs: Option<u64>,
    #[serde(default)]
    pub update_tickers_timeout_secs: Option<u64>,
    #[serde(default)]
    pub subscribe_on_pairs_delay_ms: Option<u64>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategiesConfig {
    pub arbitrage: ArbitrageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArbitrageConfig {
    pub pairs: Vec<String>,
    pub window_direct_width: f64,
    pub window_reversed_width: f64,
    pub max_spend_part: f64,
    pub fetch_order_interval_secs: u64,
    pub order_timeout_secs: u64,
    pub autoreverse_order_delta_secs: i64,
    pub order_type: String,
}

impl ArbitrageConfig {
    pub fn order_kind(&self) -> Result<OrderKind> {
        match self.order_type.as_str() {
            "market" => Ok(OrderKind::Market),
            "limit" => Ok(OrderKind::Limit),
            other => Err(Error::Config(format!(
                "strategies.arbitrage.order_type must be 'market' or 'limit', got '{other}'"
            ))),
        }
    }
}

impl Config {
    /// Parse a YAML config file, matching the original's plain
    /// `yaml.load(file.read())`.
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
        serde_yaml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Resolve a venue's API secret from the environment, the way the
    /// original keeps credentials out of `config.yaml` entirely and the
    /// teacher reads `HL_PRIVATE_KEY` via `std::env::var`.
    pub fn resolve_secret(env_var: &Option<String>) -> Result<String> {
        let env_var = env_var
            .as_deref()
            .ok_or_else(|| Error::Config("missing api secret env var name".into()))?;
        std::env::var(env_var).map_err(|_| Error::Config(format!("{env_var} is not set")))
    }
}
