use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::binance::interval::KlineInterval;
use crate::error::{PairWatchError, Result};

const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const DEFAULT_REST_URL: &str = "https://api.binance.com";

/// Runtime settings, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// First day of the initial training window (UTC midnight).
    pub from_date: NaiveDate,
    /// Last day of the initial training window (UTC midnight).
    pub to_date: NaiveDate,
    /// Retrain cadence; the training window also slides by this much per cycle.
    pub update_period_minutes: u64,
    #[serde(default = "default_sample_time")]
    pub sample_time: KlineInterval,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
    #[serde(default = "default_alert_window_minutes")]
    pub alert_window_minutes: u64,
    #[serde(default)]
    pub verbose: bool,
    /// Instrument A, the regression feature.
    #[serde(default = "default_predictor_symbol")]
    pub predictor_symbol: String,
    /// Instrument B, the regression target and the alerted instrument.
    #[serde(default = "default_target_symbol")]
    pub target_symbol: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
}

fn default_sample_time() -> KlineInterval {
    KlineInterval::D1
}

fn default_alert_threshold() -> f64 {
    0.01
}

fn default_alert_window_minutes() -> u64 {
    60
}

fn default_predictor_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_target_symbol() -> String {
    "ETHUSDT".to_string()
}

fn default_ws_url() -> String {
    DEFAULT_WS_URL.to_string()
}

fn default_rest_url() -> String {
    DEFAULT_REST_URL.to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| PairWatchError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| PairWatchError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.from_date >= self.to_date {
            return Err(PairWatchError::ConfigError(format!(
                "from_date {} must be before to_date {}",
                self.from_date, self.to_date
            )));
        }
        if self.update_period_minutes == 0 {
            return Err(PairWatchError::ConfigError(
                "update_period_minutes must be positive".to_string(),
            ));
        }
        if self
            .update_period_minutes
            .checked_mul(60_000)
            .map_or(true, |ms| ms > i64::MAX as u64)
        {
            return Err(PairWatchError::ConfigError(format!(
                "update_period_minutes {} is out of range",
                self.update_period_minutes
            )));
        }
        if self.alert_window_minutes.checked_mul(60).is_none() {
            return Err(PairWatchError::ConfigError(format!(
                "alert_window_minutes {} is out of range",
                self.alert_window_minutes
            )));
        }
        if !(self.alert_threshold.is_finite() && self.alert_threshold > 0.0) {
            return Err(PairWatchError::ConfigError(format!(
                "alert_threshold must be positive, got {}",
                self.alert_threshold
            )));
        }
        if self.predictor_symbol.eq_ignore_ascii_case(&self.target_symbol) {
            return Err(PairWatchError::ConfigError(
                "predictor_symbol and target_symbol must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_ms(&self) -> i64 {
        date_to_unix_ms(self.from_date)
    }

    pub fn to_ms(&self) -> i64 {
        date_to_unix_ms(self.to_date)
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_period_minutes.saturating_mul(60))
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alert_window_minutes.saturating_mul(60))
    }
}

/// UTC midnight of `date` in epoch milliseconds.
pub fn date_to_unix_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}
