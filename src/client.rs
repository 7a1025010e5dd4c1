//! HTTP client for the gateway's local API
//!
//! Thin retry-with-backoff shim over `reqwest`. Connectivity failures
//! (refused, timed out) and content failures (reachable device, unusable
//! body) surface as different error variants because callers treat them
//! differently: skip the poll cycle versus drop the single response.

use crate::config::GatewayConfig;
use crate::decoder::{apply_field_map, parse_livedata, Record};
use crate::error::{GatewayError, Result};
use crate::sensors::GatewaySensors;
use chrono::Utc;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// HTTP client for a single gateway device
#[derive(Debug, Clone)]
pub struct GatewayHttpClient {
    /// HTTP client instance
    client: Client,

    /// Base URL for the device
    base_url: Url,

    /// Configuration
    config: GatewayConfig,
}

impl GatewayHttpClient {
    /// Create a new client for the device in `config`
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let base_url = config.base_url()?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(format!("ecowitt-gateway/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build URL for an API endpoint
    fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::config(format!("invalid URL path {path}: {e}")))
    }

    /// Execute an HTTP request with retry logic.
    ///
    /// Up to `max_retries` attempts with a fixed `retry_wait` between them;
    /// exhausting the budget reports the device as unreachable.
    async fn execute_request(&self, url: Url) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            debug!("HTTP request attempt {attempt} to {url}");

            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    let status = response.status();
                    warn!("HTTP error {status} from {url}");
                    last_error = Some(format!("HTTP error {status}"));
                }
                Err(e) => {
                    warn!("HTTP request failed: {e}");
                    last_error = Some(if e.is_timeout() {
                        format!("request timed out: {e}")
                    } else {
                        format!("request failed: {e}")
                    });
                }
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(self.config.retry_wait).await;
            }
        }

        Err(GatewayError::unreachable(format!(
            "{url}: {}",
            last_error.unwrap_or_else(|| "all retry attempts failed".to_string())
        )))
    }

    /// Fetch an endpoint and parse its body as JSON.
    ///
    /// A body that is not JSON means the device answered but the response is
    /// malformed; that is a content failure, not a connectivity one.
    async fn fetch_json(&self, endpoint: &str) -> Result<Value> {
        let url = self.build_url(endpoint)?;
        let response = self.execute_request(url).await?;
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::unreachable(format!("failed to read response: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| GatewayError::parse(format!("malformed {endpoint} response: {e}")))
    }

    /// Fetch the raw live-data response
    pub async fn get_livedata(&self) -> Result<Value> {
        self.fetch_json("get_livedata_info").await
    }

    /// Fetch the raw firmware-version response
    pub async fn get_version(&self) -> Result<Value> {
        self.fetch_json("get_version").await
    }

    /// Fetch the raw station-settings response
    pub async fn get_ws_settings(&self) -> Result<Value> {
        self.fetch_json("get_ws_settings").await
    }

    /// Fetch the raw sensor-list response
    pub async fn get_sensors_info(&self) -> Result<Value> {
        self.fetch_json("get_sensors_info").await
    }

    /// Fetch the raw SD-storage info response (log file listing)
    pub async fn get_sdmmc_info(&self) -> Result<Value> {
        self.fetch_json("get_sdmmc_info").await
    }

    /// Fetch a device-resident log file by name
    pub async fn fetch_logfile(&self, name: &str) -> Result<String> {
        let url = self.build_url(name)?;
        let response = self.execute_request(url).await?;
        response
            .text()
            .await
            .map_err(|e| GatewayError::unreachable(format!("failed to read log file {name}: {e}")))
    }

    /// Poll once and decode into a normalized record.
    ///
    /// Adds the `datetime` and `interval` fields the host framework expects.
    pub async fn current_record(&self) -> Result<Record> {
        let raw = self.get_livedata().await?;
        let mut record = parse_livedata(&raw, Some(self.config.unit_system))?;
        apply_field_map(&mut record, &self.config.field_map);
        record.insert("datetime".to_string(), Value::from(Utc::now().timestamp()));
        record.insert(
            "interval".to_string(),
            Value::from(self.config.poll_interval.as_secs()),
        );
        Ok(record)
    }

    /// Fetch the sensor list and classify it under the configured policy
    pub async fn sensors(&self) -> Result<GatewaySensors> {
        let raw = self.get_sensors_info().await?;
        let mut sensors = GatewaySensors::new(self.config.only_registered);
        sensors.update(&raw)?;
        Ok(sensors)
    }

    /// Health check: does the device answer at all?
    ///
    /// Never propagates an error; an unreachable device is simply unhealthy.
    pub async fn health_check(&self) -> bool {
        match self.get_version().await {
            Ok(_) => true,
            Err(e) => {
                debug!("health check failed: {e}");
                false
            }
        }
    }
}
