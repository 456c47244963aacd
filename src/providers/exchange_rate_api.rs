use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::config::SourceConfig;
use crate::core::rate::RateSnapshot;
use crate::core::source::RateSource;
use crate::providers::util::with_retry;

/// Client for exchangerate-api style `/latest/{base}` endpoints.
pub struct ExchangeRateApiSource {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay: Duration,
}

impl ExchangeRateApiSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("ratesync/0.1")
            .timeout(timeout)
            .build()?;
        Ok(ExchangeRateApiSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries: 0,
            retry_delay: Duration::from_millis(500),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Ok(Self::new(&config.base_url, config.timeout())?
            .with_retries(config.retries, Duration::from_millis(config.retry_delay_ms)))
    }

    pub fn with_retries(mut self, retries: usize, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    result: Option<String>,
    #[serde(rename = "error-type")]
    error_type: Option<String>,
    base_code: Option<String>,
    #[serde(default)]
    conversion_rates: BTreeMap<String, f64>,
}

#[async_trait]
impl RateSource for ExchangeRateApiSource {
    #[instrument(name = "ExchangeRateFetch", skip(self), fields(base = %base))]
    async fn fetch(&self, base: &str) -> Result<RateSnapshot> {
        let url = format!("{}/latest/{}", self.base_url, base.to_uppercase());
        debug!("Requesting latest rates from {}", url);

        let response = with_retry(
            || async { self.client.get(&url).send().await?.error_for_status() },
            self.retries,
            self.retry_delay,
        )
        .await
        .with_context(|| format!("Request error for base currency: {base}"))?;

        let text = response.text().await?;
        let data: LatestRatesResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", base, e))?;

        if data.result.as_deref() == Some("error") {
            return Err(anyhow!(
                "Rate source returned error for {}: {}",
                base,
                data.error_type.as_deref().unwrap_or("unknown")
            ));
        }

        let base_code = data.base_code.unwrap_or_else(|| base.to_uppercase());
        debug!(
            "Received {} rates for base currency {}",
            data.conversion_rates.len(),
            base_code
        );
        Ok(RateSnapshot::live(&base_code, data.conversion_rates))
    }
}
