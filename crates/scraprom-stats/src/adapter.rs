use std::sync::Arc;

use scraprom_common::error::{Result, ScrapromError};
use scraprom_metrics::{MetricHandle, MetricType, MetricsRegistry};
use tracing::{debug, warn};

use crate::{source::ActiveSource, store::MemoryStatsStore, value::StatValue};

/// Applies stats mutations to the store, then mirrors numeric results into
/// the metrics registry: increments feed counters, everything else gauges.
///
/// Store updates are committed before the registry is touched, so a
/// registration error leaves the stat recorded and is returned to the caller.
pub struct StatsAdapter {
    store: Arc<MemoryStatsStore>,
    registry: Arc<MetricsRegistry>,
    active_source: ActiveSource,
    source_label: String,
}

impl StatsAdapter {
    pub fn new(
        store: Arc<MemoryStatsStore>,
        registry: Arc<MetricsRegistry>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            active_source: ActiveSource::new(),
            source_label: source_label.into(),
        }
    }

    pub fn store(&self) -> Arc<MemoryStatsStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn active_source(&self) -> Option<String> {
        self.active_source.current()
    }

    pub fn open_source(&self, name: &str) {
        debug!(source = %name, "stats source opened");
        self.active_source.set(name);
    }

    pub fn close_source(&self, name: &str) -> Result<()> {
        debug!(source = %name, "stats source closed");
        self.store.retain_for_source(name)?;
        self.active_source.clear(name);
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Option<StatValue> {
        self.store.get_value(key)
    }

    pub fn set_value(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        let source = self.active_source.resolve(source);
        let committed = self.store.set_value(key, value.into())?;
        self.mirror_gauge(key, &committed, &source)
    }

    pub fn increment_value(
        &self,
        key: &str,
        count: impl Into<StatValue>,
        start: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        let source = self.active_source.resolve(source);
        let count = count.into();
        let delta = count
            .as_f64()
            .ok_or_else(|| ScrapromError::NonNumericStat(key.to_string()))?;
        self.store.inc_value(key, &count, &start.into())?;

        let labels = [source.as_str()];
        match self.metric(key, MetricType::Counter)? {
            MetricHandle::Counter(counter) => {
                if delta < 0.0 {
                    warn!(key = %key, delta, "negative increment not mirrored to counter");
                } else {
                    counter.inc(&labels, delta);
                }
            }
            MetricHandle::Gauge(gauge) => gauge.inc(&labels, delta),
        }
        Ok(())
    }

    pub fn inc_one(&self, key: &str, source: Option<&str>) -> Result<()> {
        self.increment_value(key, 1, 0, source)
    }

    pub fn track_maximum(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        let source = self.active_source.resolve(source);
        let committed = self.store.max_value(key, value.into())?;
        self.mirror_gauge(key, &committed, &source)
    }

    pub fn track_minimum(
        &self,
        key: &str,
        value: impl Into<StatValue>,
        source: Option<&str>,
    ) -> Result<()> {
        let source = self.active_source.resolve(source);
        let committed = self.store.min_value(key, value.into())?;
        self.mirror_gauge(key, &committed, &source)
    }

    fn mirror_gauge(&self, key: &str, value: &StatValue, source: &str) -> Result<()> {
        // timestamps and text stay in the store only
        let Some(value) = value.as_f64() else {
            return Ok(());
        };

        match self.metric(key, MetricType::Gauge)? {
            MetricHandle::Gauge(gauge) => gauge.set(&[source], value),
            MetricHandle::Counter(_) => {
                warn!(key = %key, "stat is registered as a counter, gauge update skipped");
            }
        }
        Ok(())
    }

    fn metric(&self, key: &str, metric_type: MetricType) -> Result<MetricHandle> {
        self.registry
            .get_or_create(key, metric_type, &[self.source_label.as_str()])
    }
}
