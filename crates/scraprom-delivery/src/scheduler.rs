use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scraprom_common::{DeliveryMode, ScrapromConfig, error::Result};
use scraprom_metrics::MetricsRegistry;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    grouping::default_grouping_key,
    pull::MetricsServer,
    push::PushGateway,
};

/// Push attempts made by a scheduler and how many of them failed.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl DeliveryStats {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

enum Running {
    Push(JoinHandle<()>),
    Pull(MetricsServer),
}

/// Delivers registry snapshots either by pushing on a timer or by serving scrapes.
pub struct DeliveryScheduler {
    config: ScrapromConfig,
    registry: Arc<MetricsRegistry>,
    stats: Arc<DeliveryStats>,
    running: Option<Running>,
}

impl DeliveryScheduler {
    pub fn new(config: ScrapromConfig, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            registry,
            stats: Arc::new(DeliveryStats::default()),
            running: None,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.config.delivery
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        match &self.running {
            Some(Running::Push(handle)) => !handle.is_finished(),
            Some(Running::Pull(server)) => server.is_running(),
            None => false,
        }
    }

    /// Bound address of the scrape endpoint in pull mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.running {
            Some(Running::Pull(server)) => Some(server.local_addr()),
            _ => None,
        }
    }

    /// Starts delivery. Calling it again while running does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!(mode = ?self.config.delivery, "delivery scheduler already running");
            return Ok(());
        }
        self.config.validate()?;

        let running = match self.config.delivery {
            DeliveryMode::Push => Running::Push(self.spawn_push_loop()?),
            DeliveryMode::Pull => Running::Pull(
                MetricsServer::bind(
                    &self.config.bind_addr(),
                    &self.config.normalized_metrics_path(),
                    Arc::clone(&self.registry),
                )
                .await?,
            ),
        };
        self.running = Some(running);
        Ok(())
    }

    /// Cancels the push timer or closes the scrape endpoint. In-flight pushes
    /// are abandoned.
    pub async fn stop(&mut self) {
        match self.running.take() {
            Some(Running::Push(handle)) => {
                handle.abort();
                let _ = handle.await;
                info!("metrics push loop stopped");
            }
            Some(Running::Pull(mut server)) => server.shutdown().await,
            None => {}
        }
    }

    fn spawn_push_loop(&self) -> Result<JoinHandle<()>> {
        let gateway = PushGateway::new(&self.config, &default_grouping_key())?;
        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let period = self.config.update_interval();
        info!(
            url = %gateway.url(),
            interval_secs = period.as_secs_f64(),
            "metrics push loop started"
        );

        Ok(tokio::spawn(async move {
            let mut ticker = interval(period);
            // a push slower than the interval drops the ticks it overlapped
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                // first tick completes immediately
                ticker.tick().await;
                stats.attempts.fetch_add(1, Ordering::Relaxed);
                match gateway.push(&registry).await {
                    Ok(()) => debug!(url = %gateway.url(), "pushed metrics"),
                    Err(err) => {
                        stats.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %err, "metrics push failed");
                    }
                }
            }
        }))
    }
}

impl Drop for DeliveryScheduler {
    fn drop(&mut self) {
        if let Some(Running::Push(handle)) = &self.running {
            handle.abort();
        }
    }
}
