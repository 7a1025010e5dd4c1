//! Configuration for the gateway adapter

use crate::error::{GatewayError, Result};
use crate::units::UnitSystem;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{env, path::Path, time::Duration};
use url::Url;

/// Gateway adapter configuration.
///
/// Durations serialize in human form (`"20s"`, `"1h"`). The host framework
/// owns scheduling; `poll_interval` is carried so decoded records can report
/// the cycle length they belong to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Device host name or IP address
    pub host: String,

    /// Device HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Output unit profile
    #[serde(default)]
    pub unit_system: UnitSystem,

    /// Poll cycle length reported in records
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Per-attempt HTTP timeout
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Maximum attempts per HTTP request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed wait between HTTP attempts
    #[serde(with = "humantime_serde", default = "default_retry_wait")]
    pub retry_wait: Duration,

    /// Maximum attempts per catchup log file download
    #[serde(default = "default_catchup_retries")]
    pub catchup_retries: u32,

    /// Clock misalignment tolerated between the last live record and the
    /// first catchup row
    #[serde(with = "humantime_serde", default = "default_catchup_grace")]
    pub catchup_grace: Duration,

    /// Count only device-side enabled sensors as enabled
    #[serde(default)]
    pub only_registered: bool,

    /// Optional output field-name remapping/extension table
    #[serde(default)]
    pub field_map: HashMap<String, String>,
}

fn default_port() -> u16 {
    80
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_catchup_retries() -> u32 {
    3
}

fn default_catchup_grace() -> Duration {
    Duration::from_secs(120)
}

impl GatewayConfig {
    /// Create a configuration with defaults for everything but the host
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            unit_system: UnitSystem::default(),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_wait: default_retry_wait(),
            catchup_retries: default_catchup_retries(),
            catchup_grace: default_catchup_grace(),
            only_registered: false,
            field_map: HashMap::new(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = env::var("GATEWAY_HOST")
            .map_err(|_| GatewayError::config("GATEWAY_HOST not set"))?;
        let mut config = Self::new(host);

        if let Ok(port) = env::var("GATEWAY_PORT") {
            config.port = port
                .parse()
                .map_err(|_| GatewayError::config(format!("invalid GATEWAY_PORT: {port}")))?;
        }
        if let Ok(units) = env::var("GATEWAY_UNIT_SYSTEM") {
            config.unit_system = match units.to_lowercase().as_str() {
                "us" => UnitSystem::Us,
                "metric" => UnitSystem::Metric,
                "metricwx" => UnitSystem::MetricWx,
                other => {
                    return Err(GatewayError::config(format!(
                        "invalid GATEWAY_UNIT_SYSTEM: {other}"
                    )))
                }
            };
        }
        if let Ok(flag) = env::var("GATEWAY_ONLY_REGISTERED") {
            config.only_registered = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| GatewayError::config(format!("invalid configuration file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field values and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::config("device host must not be empty"));
        }
        if self.max_retries == 0 {
            return Err(GatewayError::config("max_retries must be at least 1"));
        }
        if self.catchup_retries == 0 {
            return Err(GatewayError::config("catchup_retries must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(GatewayError::config("timeout must be non-zero"));
        }
        Ok(())
    }

    /// Base URL for device HTTP requests
    pub fn base_url(&self) -> Result<Url> {
        let text = format!("http://{}:{}/", self.host, self.port);
        Url::parse(&text)
            .map_err(|e| GatewayError::config(format!("invalid device address {text:?}: {e}")))
    }
}
