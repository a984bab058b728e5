use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use scraprom_common::{
    PushMethod, ScrapromConfig,
    error::{Result, ScrapromError},
};
use scraprom_metrics::{MetricsRegistry, TEXT_CONTENT_TYPE};

use crate::grouping::{GroupingKey, push_url};

/// Client for one push gateway group.
pub struct PushGateway {
    url: String,
    method: PushMethod,
    client: reqwest::Client,
}

impl PushGateway {
    pub fn new(config: &ScrapromConfig, grouping_key: &GroupingKey) -> Result<Self> {
        Self::with_timeout(
            push_url(&config.pushgateway_url, &config.job_name, grouping_key),
            config.push_method,
            config.push_timeout(),
        )
    }

    pub fn with_timeout(url: String, method: PushMethod, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                ScrapromError::InternalError(format!("failed to build push client: {err}"))
            })?;

        Ok(Self {
            url,
            method,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one snapshot of `registry`. No retries.
    pub async fn push(&self, registry: &MetricsRegistry) -> Result<()> {
        let body = registry.render_prometheus();
        let request = match self.method {
            PushMethod::Post => self.client.post(&self.url),
            PushMethod::Put => self.client.put(&self.url),
        };

        let response = request
            .header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|err| {
                ScrapromError::PushFailed(format!("failed to push metrics to {}: {err}", self.url))
            })?;

        if !response.status().is_success() {
            return Err(ScrapromError::PushFailed(format!(
                "push gateway {} returned status {}",
                self.url,
                response.status()
            )));
        }

        Ok(())
    }
}
