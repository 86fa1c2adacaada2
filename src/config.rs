// Settings: defaults < fxtick.toml / --config < FXTICK_* env < CLI flags

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::market_data::client::{StreamConfig, DEFAULT_ENDPOINT, DEFAULT_INSTRUMENT, RECONNECT_DELAY};

pub const DEFAULT_CONFIG_FILE: &str = "fxtick";
pub const ENV_PREFIX: &str = "FXTICK";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Default, Parser)]
#[command(name = "fxtick", version, about = "Live EUR/USD quote from a streaming market-data feed")]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// WebSocket endpoint of the feed
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Instrument to subscribe to
    #[arg(long)]
    pub instrument: Option<String>,
    #[arg(long)]
    pub reconnect_delay_ms: Option<u64>,
    /// tracing filter used when RUST_LOG is unset
    #[arg(long)]
    pub log_filter: Option<String>,
    /// Address for the Prometheus exporter, e.g. 0.0.0.0:9000
    #[arg(long)]
    pub metrics_addr: Option<String>,
    /// Exit after the first quote
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub endpoint: String,
    pub instrument: String,
    pub reconnect_delay_ms: u64,
    pub log_filter: String,
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => File::from(path.as_path()).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings: Settings = Config::builder()
            .set_default("endpoint", DEFAULT_ENDPOINT)?
            .set_default("instrument", DEFAULT_INSTRUMENT)?
            .set_default("reconnect_delay_ms", RECONNECT_DELAY.as_millis() as i64)?
            .set_default("log_filter", DEFAULT_LOG_FILTER)?
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .set_override_option("endpoint", cli.endpoint.clone())?
            .set_override_option("instrument", cli.instrument.clone())?
            .set_override_option("reconnect_delay_ms", cli.reconnect_delay_ms.map(|ms| ms as i64))?
            .set_override_option("log_filter", cli.log_filter.clone())?
            .set_override_option("metrics_addr", cli.metrics_addr.clone())?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "endpoint", reason: "must not be empty".into() });
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: format!("expected a ws:// or wss:// URL, got {}", self.endpoint),
            });
        }
        if self.instrument.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "instrument", reason: "must not be empty".into() });
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid { field: "reconnect_delay_ms", reason: "must be positive".into() });
        }
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            endpoint: self.endpoint.clone(),
            instrument: self.instrument.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }
}
