use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use scraprom_common::{ScrapromConfig, error::Result};
use scraprom_delivery::{DeliveryScheduler, DeliveryStats};
use scraprom_metrics::MetricsRegistry;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::signals::WorkObserver;

/// Owns the process registry and runs at most one delivery scheduler for it.
pub struct LifecycleController {
    config: ScrapromConfig,
    registry: Arc<MetricsRegistry>,
    scheduler: Mutex<Option<DeliveryScheduler>>,
}

impl LifecycleController {
    pub fn new(config: ScrapromConfig) -> Self {
        let registry = Arc::new(MetricsRegistry::new(config.metric_prefix.clone()));
        Self {
            config,
            registry,
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ScrapromConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .is_some_and(DeliveryScheduler::is_running)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .and_then(DeliveryScheduler::local_addr)
    }

    pub async fn delivery_stats(&self) -> Option<Arc<DeliveryStats>> {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .map(DeliveryScheduler::stats)
    }
}

#[async_trait]
impl WorkObserver for LifecycleController {
    async fn on_work_started(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        if scheduler.as_ref().is_some_and(DeliveryScheduler::is_running) {
            debug!("work started again, delivery already running");
            return Ok(());
        }

        let mut next = DeliveryScheduler::new(self.config.clone(), Arc::clone(&self.registry));
        next.start().await?;
        info!(mode = ?next.mode(), "metrics delivery started");
        *scheduler = Some(next);
        Ok(())
    }

    async fn on_work_stopped(&self) {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            return;
        };
        scheduler.stop().await;
        info!(mode = ?scheduler.mode(), "metrics delivery stopped");
    }
}

#[cfg(test)]
mod tests {
    use scraprom_common::{DeliveryMode, ScrapromConfig};

    use super::LifecycleController;
    use crate::signals::WorkObserver;

    fn pull_config() -> ScrapromConfig {
        ScrapromConfig {
            delivery: DeliveryMode::Pull,
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            ..ScrapromConfig::default()
        }
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let controller = LifecycleController::new(pull_config());
        controller.on_work_stopped().await;
        assert!(!controller.is_running().await);
    }

    #[tokio::test]
    async fn repeated_start_keeps_one_scheduler() {
        let controller = LifecycleController::new(pull_config());
        controller.on_work_started().await.unwrap();
        let addr = controller.local_addr().await.unwrap();
        controller.on_work_started().await.unwrap();

        assert_eq!(controller.local_addr().await, Some(addr));
        controller.on_work_stopped().await;
        assert!(!controller.is_running().await);
        assert!(controller.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn can_restart_after_stop() {
        let controller = LifecycleController::new(pull_config());
        controller.on_work_started().await.unwrap();
        controller.on_work_stopped().await;
        controller.on_work_started().await.unwrap();

        assert!(controller.is_running().await);
        controller.on_work_stopped().await;
    }

    #[test]
    fn registry_uses_configured_prefix() {
        let controller = LifecycleController::new(ScrapromConfig {
            metric_prefix: "crawl".to_string(),
            ..ScrapromConfig::default()
        });
        assert_eq!(controller.registry().prefix(), "crawl");
    }
}
