//! Configuration loading and validation.
//!
//! YAML file with `${VAR}` / `${VAR:-default}` environment interpolation.
//! Every collection cycle receives an immutable snapshot of this structure;
//! nothing re-reads configuration mid-cycle.
//!
//! ```no_run
//! use portfolio_exporter::config::load_config;
//!
//! let config = load_config(None)?;
//! # Ok::<(), portfolio_exporter::config::ConfigError>(())
//! ```

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Currency;
use crate::xirr::SolverConfig;

/// Token placeholder shipped in the sample config; startup rejects it.
pub const TOKEN_PLACEHOLDER: &str = "CHANGEME";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scrape server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Broker API configuration.
    pub broker: BrokerConfig,
    /// Valuation configuration.
    #[serde(default)]
    pub valuation: ValuationConfig,
    /// Operation history configuration.
    #[serde(default)]
    pub history: HistoryConfig,
    /// XIRR solver tuning.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Watchlist tickers tracked regardless of holdings.
    #[serde(default)]
    pub tickers: Vec<String>,
}

/// Scrape server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port for the scrape endpoint and `/health`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Scrape endpoint path.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Port for operational self-metrics; 0 disables the listener.
    #[serde(default)]
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            endpoint: default_endpoint(),
            metrics_port: 0,
        }
    }
}

/// Broker API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Bearer token; load it via `${TINKOFF_TOKEN}` interpolation.
    #[serde(default = "default_token")]
    pub token: String,
    /// REST base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BrokerConfig {
    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Valuation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Currency aggregate totals are reported in.
    #[serde(default = "default_base_currency")]
    pub base_currency: Currency,
    /// Quote instrument per non-base currency code (lowercase key).
    #[serde(default = "default_currency_instruments")]
    pub currencies: HashMap<String, String>,
    /// Multiplier applied to a bond's last price before the accrued-interest
    /// adjustment. Venues quoting bonds in percent of a 1000-unit face value
    /// need 10 here.
    #[serde(default = "default_bond_multiplier")]
    pub bond_face_value_multiplier: Decimal,
    /// Cap on concurrent price and rate lookups per account.
    #[serde(default = "default_max_concurrent_lookups")]
    pub max_concurrent_lookups: usize,
}

impl ValuationConfig {
    /// Quote instrument identifier for a currency, if one is mapped.
    #[must_use]
    pub fn instrument_for(&self, currency: Currency) -> Option<&str> {
        self.currencies
            .get(&currency.code().to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            currencies: default_currency_instruments(),
            bond_face_value_multiplier: default_bond_multiplier(),
            max_concurrent_lookups: default_max_concurrent_lookups(),
        }
    }
}

/// Operation history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Start of the operations window fed into the return computation.
    #[serde(default = "default_history_from")]
    pub from: NaiveDate,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            from: default_history_from(),
        }
    }
}

const fn default_port() -> u16 {
    8000
}

fn default_endpoint() -> String {
    "/metrics".to_string()
}

fn default_token() -> String {
    TOKEN_PLACEHOLDER.to_string()
}

fn default_base_url() -> String {
    "https://api-invest.tinkoff.ru/openapi".to_string()
}

const fn default_timeout_secs() -> u64 {
    20
}

const fn default_base_currency() -> Currency {
    Currency::Rub
}

fn default_currency_instruments() -> HashMap<String, String> {
    HashMap::from([
        ("usd".to_string(), "BBG0013HGFT4".to_string()),
        ("eur".to_string(), "BBG0013HJJ31".to_string()),
    ])
}

fn default_bond_multiplier() -> Decimal {
    Decimal::ONE
}

const fn default_max_concurrent_lookups() -> usize {
    8
}

fn default_history_from() -> NaiveDate {
    // Predates retail access to the broker; effectively "everything".
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Load configuration from a YAML file.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let mut config: Config = serde_yaml_bw::from_str(&interpolated)?;

    // Runtime lookups key on the lowercase code; accept any casing in the file.
    config.valuation.currencies = std::mem::take(&mut config.valuation.currencies)
        .into_iter()
        .map(|(code, figi)| (code.to_ascii_lowercase(), figi))
        .collect();

    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.endpoint.is_empty() || !config.server.endpoint.starts_with('/') {
        return Err(ConfigError::ValidationError(
            "server.endpoint must start with '/'".to_string(),
        ));
    }

    if config.server.metrics_port != 0 && config.server.metrics_port == config.server.port {
        return Err(ConfigError::ValidationError(
            "server.metrics_port must differ from server.port".to_string(),
        ));
    }

    if config.broker.base_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "broker.base_url must not be empty".to_string(),
        ));
    }

    if config.broker.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "broker.timeout_secs must be positive".to_string(),
        ));
    }

    for (code, figi) in &config.valuation.currencies {
        if Currency::from_code(code).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "valuation.currencies: unknown currency code '{code}'"
            )));
        }
        if figi.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "valuation.currencies.{code}: instrument must not be empty"
            )));
        }
    }

    if config.valuation.bond_face_value_multiplier <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "valuation.bond_face_value_multiplier must be positive".to_string(),
        ));
    }

    if config.valuation.max_concurrent_lookups == 0 {
        return Err(ConfigError::ValidationError(
            "valuation.max_concurrent_lookups must be positive".to_string(),
        ));
    }

    if config.solver.max_iterations == 0 {
        return Err(ConfigError::ValidationError(
            "solver.max_iterations must be positive".to_string(),
        ));
    }

    if config.solver.tolerance <= 0.0 {
        return Err(ConfigError::ValidationError(
            "solver.tolerance must be positive".to_string(),
        ));
    }

    if config.solver.min_rate <= -1.0 || config.solver.min_rate >= config.solver.max_rate {
        return Err(ConfigError::ValidationError(
            "solver rate bounds must satisfy -1 < min_rate < max_rate".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const MINIMAL: &str = r#"
broker:
  token: "t.test-token"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = load_config_from_string(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.endpoint, "/metrics");
        assert_eq!(config.server.metrics_port, 0);
        assert_eq!(config.broker.timeout_secs, 20);
        assert_eq!(config.valuation.base_currency, Currency::Rub);
        assert_eq!(config.valuation.bond_face_value_multiplier, Decimal::ONE);
        assert_eq!(config.valuation.max_concurrent_lookups, 8);
        assert_eq!(
            config.history.from,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
        assert!(config.tickers.is_empty());
    }

    #[test]
    fn default_currency_mapping_is_per_currency() {
        let config = load_config_from_string(MINIMAL).unwrap();
        assert_eq!(
            config.valuation.instrument_for(Currency::Usd),
            Some("BBG0013HGFT4")
        );
        assert_eq!(
            config.valuation.instrument_for(Currency::Eur),
            Some("BBG0013HJJ31")
        );
        assert_eq!(config.valuation.instrument_for(Currency::Gbp), None);
    }

    #[test]
    fn env_interpolation_with_default() {
        let result = interpolate_env_vars("token: ${DEFINITELY_UNSET_VAR_42:-fallback}");
        assert_eq!(result, "token: fallback");
    }

    #[test]
    fn env_interpolation_missing_var_becomes_empty() {
        let result = interpolate_env_vars("token: [${DEFINITELY_UNSET_VAR_42}]");
        assert_eq!(result, "token: []");
    }

    #[test]
    fn uppercase_currency_keys_are_normalized() {
        let yaml = r#"
broker:
  token: "t.test-token"
valuation:
  currencies:
    USD: "BBG0013HGFT4"
    Eur: "BBG0013HJJ31"
"#;
        let config = load_config_from_string(yaml).unwrap();
        assert_eq!(
            config.valuation.instrument_for(Currency::Usd),
            Some("BBG0013HGFT4")
        );
        assert_eq!(
            config.valuation.instrument_for(Currency::Eur),
            Some("BBG0013HJJ31")
        );
    }

    #[test]
    fn rejects_unknown_currency_code() {
        let yaml = r#"
broker:
  token: "t.test-token"
valuation:
  currencies:
    doge: "BBG000000001"
"#;
        assert!(matches!(
            load_config_from_string(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_endpoint_without_leading_slash() {
        let yaml = r#"
broker:
  token: "t.test-token"
server:
  endpoint: "metrics"
"#;
        assert!(matches!(
            load_config_from_string(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn rejects_colliding_ports() {
        let yaml = r#"
broker:
  token: "t.test-token"
server:
  port: 9000
  metrics_port: 9000
"#;
        assert!(matches!(
            load_config_from_string(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn full_config_round_trip() {
        let yaml = r#"
server:
  port: 8000
  endpoint: /metrics
  metrics_port: 9090
broker:
  token: "t.test-token"
  base_url: "https://api-invest.tinkoff.ru/openapi"
  timeout_secs: 20
valuation:
  base_currency: RUB
  bond_face_value_multiplier: 10
  max_concurrent_lookups: 4
  currencies:
    usd: "BBG0013HGFT4"
    eur: "BBG0013HJJ31"
history:
  from: 2015-06-01
solver:
  max_iterations: 200
  tolerance: 0.000001
  initial_guess: 0.05
  min_rate: -0.99
  max_rate: 10.0
tickers:
  - AAPL
  - SBER
"#;
        let config = load_config_from_string(yaml).unwrap();
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(
            config.valuation.bond_face_value_multiplier,
            Decimal::from(10)
        );
        assert_eq!(config.solver.max_iterations, 200);
        assert_eq!(config.tickers, vec!["AAPL", "SBER"]);
        assert_eq!(
            config.history.from,
            NaiveDate::from_ymd_opt(2015, 6, 1).unwrap()
        );
    }
}
