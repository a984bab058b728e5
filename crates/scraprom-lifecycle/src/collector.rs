use std::sync::Arc;

use scraprom_common::{ScrapromConfig, error::Result};
use scraprom_metrics::MetricsRegistry;
use scraprom_stats::{MemoryStatsStore, StatValue, StatsAdapter};

use crate::{controller::LifecycleController, signals::WorkSignals};

/// Stats collector that exports every numeric stat to Prometheus.
///
/// Built from a stats store, the controller's registry and a delivery
/// scheduler; the controller is connected to `signals` on construction so
/// delivery follows the host's work lifecycle.
pub struct PromStatsCollector {
    stats: Arc<StatsAdapter>,
    controller: Arc<LifecycleController>,
}

impl PromStatsCollector {
    pub fn new(config: ScrapromConfig, signals: &WorkSignals) -> Result<Self> {
        config.validate()?;
        let source_label = config.source_label.clone();
        let controller = Arc::new(LifecycleController::new(config));
        let stats = Arc::new(StatsAdapter::new(
            Arc::new(MemoryStatsStore::new()),
            controller.registry(),
            source_label,
        ));
        signals.connect(controller.clone());

        Ok(Self { stats, controller })
    }

    pub fn stats(&self) -> Arc<StatsAdapter> {
        Arc::clone(&self.stats)
    }

    pub fn controller(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.controller)
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        self.controller.registry()
    }

    pub fn get_value(&self, key: &str) -> Option<StatValue> {
        self.stats.get_value(key)
    }

    pub fn set_value(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        self.stats.set_value(key, value, source)
    }

    pub fn increment_value(
        &self,
        key: &str,
        count: impl Into<StatValue>,
        start: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        self.stats.increment_value(key, count, start, source)
    }

    pub fn track_maximum(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        self.stats.track_maximum(key, value, source)
    }

    pub fn track_minimum(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        self.stats.track_minimum(key, value, source)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use axum::{Router, http::StatusCode};
    use scraprom_common::{DeliveryMode, ScrapromConfig};

    use super::PromStatsCollector;
    use crate::signals::WorkSignals;

    #[tokio::test]
    async fn scrape_after_start_sees_registered_metrics() {
        let signals = WorkSignals::new();
        let collector = PromStatsCollector::new(
            ScrapromConfig {
                delivery: DeliveryMode::Pull,
                bind_host: "127.0.0.1".to_string(),
                bind_port: 0,
                ..ScrapromConfig::default()
            },
            &signals,
        )
        .unwrap();

        for _ in 0..3 {
            collector
                .increment_value("downloader/request_count", 1, 0, None)
                .unwrap();
        }
        collector
            .set_value("memusage/max", 1_048_576, Some("spiderA"))
            .unwrap();

        signals.emit_started().await.unwrap();
        let addr = collector.controller().local_addr().await.unwrap();
        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert!(body.contains("scraprom_downloader_request_count{spider=\"\"} 3\n"));
        assert!(body.contains("scraprom_memusage_max{spider=\"spiderA\"} 1048576\n"));

        signals.emit_stopped().await;
        assert!(!collector.controller().is_running().await);
    }

    #[tokio::test]
    async fn push_mode_delivers_before_first_interval() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().fallback(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::OK
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let signals = WorkSignals::new();
        let collector = PromStatsCollector::new(
            ScrapromConfig {
                pushgateway_url: addr.to_string(),
                update_interval_secs: 30.0,
                ..ScrapromConfig::default()
            },
            &signals,
        )
        .unwrap();
        collector.increment_value("item_scraped_count", 1, 0, None).unwrap();

        signals.emit_started().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        signals.emit_stopped().await;
    }

    #[test]
    fn rejects_invalid_config() {
        let signals = WorkSignals::new();
        let result = PromStatsCollector::new(
            ScrapromConfig {
                update_interval_secs: 0.0,
                ..ScrapromConfig::default()
            },
            &signals,
        );
        assert!(result.is_err());
        assert_eq!(signals.observer_count(), 0);
    }
}
