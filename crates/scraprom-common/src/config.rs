use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapromError};

pub const DEFAULT_PUSHGATEWAY_URL: &str = "0.0.0.0:9091";
pub const DEFAULT_JOB_NAME: &str = "scrapy";
pub const DEFAULT_PUSH_TIMEOUT_SECS: f64 = 3.0;
pub const DEFAULT_UPDATE_INTERVAL_SECS: f64 = 5.0;
pub const DEFAULT_METRIC_PREFIX: &str = "scraprom";
pub const DEFAULT_SOURCE_LABEL: &str = "spider";
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
pub const DEFAULT_BIND_PORT: u16 = 9410;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Push,
    Pull,
}

impl DeliveryMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(ScrapromError::InvalidConfig(format!(
                "unknown delivery mode: {other}"
            ))),
        }
    }
}

/// `Post` adds to the gateway group, `Put` replaces every metric in it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushMethod {
    #[default]
    Post,
    Put,
}

impl PushMethod {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            other => Err(ScrapromError::InvalidConfig(format!(
                "unknown push method: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapromConfig {
    pub pushgateway_url: String,
    pub job_name: String,
    pub push_timeout_secs: f64,
    pub update_interval_secs: f64,
    pub metric_prefix: String,
    pub source_label: String,
    pub delivery: DeliveryMode,
    pub push_method: PushMethod,
    pub bind_host: String,
    pub bind_port: u16,
    pub metrics_path: String,
}

impl Default for ScrapromConfig {
    fn default() -> Self {
        Self {
            pushgateway_url: DEFAULT_PUSHGATEWAY_URL.to_string(),
            job_name: DEFAULT_JOB_NAME.to_string(),
            push_timeout_secs: DEFAULT_PUSH_TIMEOUT_SECS,
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            source_label: DEFAULT_SOURCE_LABEL.to_string(),
            delivery: DeliveryMode::default(),
            push_method: PushMethod::default(),
            bind_host: DEFAULT_BIND_HOST.to_string(),
            bind_port: DEFAULT_BIND_PORT,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
        }
    }
}

impl ScrapromConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(value) = get("SCRAPROM_PUSHGATEWAY_URL") {
            config.pushgateway_url = value;
        }
        if let Some(value) = get("SCRAPROM_JOB_NAME") {
            config.job_name = value;
        }
        if let Some(value) = get("SCRAPROM_PUSH_TIMEOUT") {
            config.push_timeout_secs = parse_seconds("SCRAPROM_PUSH_TIMEOUT", &value)?;
        }
        if let Some(value) = get("SCRAPROM_UPDATE_INTERVAL") {
            config.update_interval_secs = parse_seconds("SCRAPROM_UPDATE_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("SCRAPROM_METRIC_PREFIX") {
            // an explicitly empty prefix is allowed
            config.metric_prefix = value.trim().to_string();
        }
        if let Some(value) = get("SCRAPROM_SOURCE_LABEL") {
            config.source_label = value;
        }
        if let Some(value) = get("SCRAPROM_DELIVERY") {
            config.delivery = DeliveryMode::parse(&value)?;
        }
        if let Some(value) = get("SCRAPROM_PUSH_METHOD") {
            config.push_method = PushMethod::parse(&value)?;
        }
        if let Some(value) = get("SCRAPROM_BIND_HOST") {
            config.bind_host = value;
        }
        if let Some(value) = get("SCRAPROM_BIND_PORT") {
            config.bind_port = value.parse().map_err(|err| {
                ScrapromError::InvalidConfig(format!("SCRAPROM_BIND_PORT={value}: {err}"))
            })?;
        }
        if let Some(value) = get("SCRAPROM_METRICS_PATH") {
            config.metrics_path = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pushgateway_url.trim().is_empty() {
            return Err(ScrapromError::InvalidConfig(
                "pushgateway url must not be empty".to_string(),
            ));
        }
        if self.job_name.trim().is_empty() {
            return Err(ScrapromError::InvalidConfig(
                "job name must not be empty".to_string(),
            ));
        }
        if seconds_to_duration(self.push_timeout_secs).is_none() {
            return Err(ScrapromError::InvalidConfig(format!(
                "push timeout must be a positive duration, got {}",
                self.push_timeout_secs
            )));
        }
        if seconds_to_duration(self.update_interval_secs).is_none() {
            return Err(ScrapromError::InvalidConfig(format!(
                "update interval must be a positive duration, got {}",
                self.update_interval_secs
            )));
        }
        if !is_valid_label_name(&self.source_label) {
            return Err(ScrapromError::InvalidConfig(format!(
                "invalid source label name: {:?}",
                self.source_label
            )));
        }
        Ok(())
    }

    /// Falls back to the default when the configured value is not a valid duration.
    pub fn push_timeout(&self) -> Duration {
        seconds_to_duration(self.push_timeout_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_PUSH_TIMEOUT_SECS))
    }

    /// Falls back to the default when the configured value is not a valid duration.
    pub fn update_interval(&self) -> Duration {
        seconds_to_duration(self.update_interval_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_UPDATE_INTERVAL_SECS))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Route path with exactly one leading slash.
    pub fn normalized_metrics_path(&self) -> String {
        format!("/{}", self.metrics_path.trim().trim_start_matches('/'))
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<f64> {
    let seconds: f64 = value
        .parse()
        .map_err(|err| ScrapromError::InvalidConfig(format!("{name}={value}: {err}")))?;
    if seconds_to_duration(seconds).is_none() {
        return Err(ScrapromError::InvalidConfig(format!(
            "{name} must be a positive number of seconds, got {value}"
        )));
    }
    Ok(seconds)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    // non-zero and representable only
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|duration| !duration.is_zero())
}

pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') || name.starts_with("__") {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::{DeliveryMode, PushMethod, ScrapromConfig, is_valid_label_name};

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| values.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ScrapromConfig::default();
        assert_eq!(config.pushgateway_url, "0.0.0.0:9091");
        assert_eq!(config.job_name, "scrapy");
        assert_eq!(config.push_timeout(), Duration::from_secs(3));
        assert_eq!(config.update_interval(), Duration::from_secs(5));
        assert_eq!(config.metric_prefix, "scraprom");
        assert_eq!(config.source_label, "spider");
        assert_eq!(config.delivery, DeliveryMode::Push);
        assert_eq!(config.push_method, PushMethod::Post);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = ScrapromConfig::from_lookup(lookup_from(&[
            ("SCRAPROM_PUSHGATEWAY_URL", "http://gateway:9091"),
            ("SCRAPROM_UPDATE_INTERVAL", "0.5"),
            ("SCRAPROM_DELIVERY", "PULL"),
            ("SCRAPROM_BIND_PORT", "9999"),
            ("SCRAPROM_METRICS_PATH", "stats"),
            ("SCRAPROM_METRIC_PREFIX", ""),
        ]))
        .unwrap();

        assert_eq!(config.pushgateway_url, "http://gateway:9091");
        assert_eq!(config.update_interval(), Duration::from_millis(500));
        assert_eq!(config.delivery, DeliveryMode::Pull);
        assert_eq!(config.bind_addr(), "0.0.0.0:9999");
        assert_eq!(config.normalized_metrics_path(), "/stats");
        assert_eq!(config.metric_prefix, "");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(
            ScrapromConfig::from_lookup(lookup_from(&[("SCRAPROM_PUSH_TIMEOUT", "0")])).is_err()
        );
        assert!(
            ScrapromConfig::from_lookup(lookup_from(&[("SCRAPROM_UPDATE_INTERVAL", "soon")]))
                .is_err()
        );
        assert!(
            ScrapromConfig::from_lookup(lookup_from(&[("SCRAPROM_DELIVERY", "carrier")])).is_err()
        );
        assert!(
            ScrapromConfig::from_lookup(lookup_from(&[("SCRAPROM_SOURCE_LABEL", "bad-label")]))
                .is_err()
        );
    }

    #[test]
    fn oversized_durations_are_rejected() {
        for name in ["SCRAPROM_PUSH_TIMEOUT", "SCRAPROM_UPDATE_INTERVAL"] {
            assert!(ScrapromConfig::from_lookup(lookup_from(&[(name, "1e20")])).is_err());
        }

        let config = ScrapromConfig {
            push_timeout_secs: 1e20,
            update_interval_secs: 1e20,
            ..ScrapromConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.push_timeout(), Duration::from_secs(3));
        assert_eq!(config.update_interval(), Duration::from_secs(5));

        let tiny = ScrapromConfig {
            update_interval_secs: 1e-12,
            ..ScrapromConfig::default()
        };
        assert!(tiny.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ScrapromConfig =
            serde_json::from_str(r#"{"job_name":"crawler","delivery":"pull"}"#).unwrap();
        assert_eq!(config.job_name, "crawler");
        assert_eq!(config.delivery, DeliveryMode::Pull);
        assert_eq!(config.metric_prefix, "scraprom");
    }

    #[test]
    fn label_names_follow_exposition_rules() {
        assert!(is_valid_label_name("spider"));
        assert!(is_valid_label_name("_source1"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("1st"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("with.dot"));
    }
}
