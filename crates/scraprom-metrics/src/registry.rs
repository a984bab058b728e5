use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use scraprom_common::{
    config::is_valid_label_name,
    error::{Result, ScrapromError},
};
use tracing::{debug, warn};

use crate::{
    naming::{is_valid_metric_name, metric_name},
    types::{CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue},
};

type LabelValues = Vec<String>;

trait RegisteredMetric: Send + Sync {
    fn descriptor(&self) -> MetricDescriptor;
    fn collect(&self) -> Vec<MetricSample>;
}

/// Live metric registered for one stat key.
#[derive(Clone)]
pub enum MetricHandle {
    Counter(Arc<CounterMetric>),
    Gauge(Arc<GaugeMetric>),
}

impl MetricHandle {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Counter(metric) => &metric.series.descriptor.name,
            Self::Gauge(metric) => &metric.series.descriptor.name,
        }
    }

    pub fn same_instance(&self, other: &MetricHandle) -> bool {
        match (self, other) {
            (Self::Counter(left), Self::Counter(right)) => Arc::ptr_eq(left, right),
            (Self::Gauge(left), Self::Gauge(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        match self {
            Self::Counter(metric) => metric.get(labels),
            Self::Gauge(metric) => metric.get(labels),
        }
    }

    fn registered(&self) -> &dyn RegisteredMetric {
        match self {
            Self::Counter(metric) => &**metric,
            Self::Gauge(metric) => &**metric,
        }
    }
}

impl std::fmt::Debug for MetricHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricHandle")
            .field("type", &self.metric_type())
            .field("name", &self.name())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<String, MetricHandle>,
    // metric name -> stat key that owns it
    names: HashMap<String, String>,
}

/// Maps stat keys to live metrics, one metric per key for the registry's lifetime.
pub struct MetricsRegistry {
    prefix: String,
    state: RwLock<RegistryState>,
}

impl MetricsRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the metric registered for `key`, creating it on first use.
    ///
    /// The first registration wins: a later call asking for a different type or
    /// label schema gets the existing metric back, with a warning logged.
    pub fn get_or_create(
        &self,
        key: &str,
        metric_type: MetricType,
        label_names: &[&str],
    ) -> Result<MetricHandle> {
        {
            let state = self.read_state()?;
            if let Some(existing) = state.by_key.get(key) {
                warn_on_mismatch(key, existing, metric_type, label_names);
                return Ok(existing.clone());
            }
        }

        let mut state = self.write_state()?;
        if let Some(existing) = state.by_key.get(key) {
            warn_on_mismatch(key, existing, metric_type, label_names);
            return Ok(existing.clone());
        }

        let name = metric_name(&self.prefix, key);
        if !is_valid_metric_name(&name) {
            return Err(ScrapromError::InvalidMetricName(name));
        }
        if let Some(label) = label_names.iter().find(|label| !is_valid_label_name(label)) {
            return Err(ScrapromError::InvalidLabelName {
                name,
                label: (*label).to_string(),
            });
        }
        if let Some(existing_key) = state.names.get(&name) {
            return Err(ScrapromError::DuplicateMetric {
                name,
                existing_key: existing_key.clone(),
            });
        }

        let handle = match metric_type {
            MetricType::Counter => {
                MetricHandle::Counter(Arc::new(CounterMetric::new(&name, key, label_names)))
            }
            MetricType::Gauge => {
                MetricHandle::Gauge(Arc::new(GaugeMetric::new(&name, key, label_names)))
            }
        };
        debug!(key = %key, name = %name, metric_type = ?metric_type, "registered metric");

        state.names.insert(name, key.to_string());
        state.by_key.insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, key: &str) -> Option<MetricHandle> {
        self.read_state().ok()?.by_key.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_state().map(|state| state.by_key.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collect_all(&self) -> Vec<CollectedMetric> {
        let state = match self.state.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        let mut collected = state
            .by_key
            .values()
            .map(|handle| {
                let metric = handle.registered();
                let mut samples = metric.collect();
                samples.sort_by(|left, right| left.labels.cmp(&right.labels));
                CollectedMetric {
                    descriptor: metric.descriptor(),
                    samples,
                }
            })
            .collect::<Vec<_>>();

        collected.sort_by(|left, right| left.descriptor.name.cmp(&right.descriptor.name));
        collected
    }

    /// Renders every registered metric in the text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        for metric in self.collect_all() {
            output.push_str("# HELP ");
            output.push_str(&metric.descriptor.name);
            output.push(' ');
            output.push_str(&escape_help(&metric.descriptor.help));
            output.push('\n');

            output.push_str("# TYPE ");
            output.push_str(&metric.descriptor.name);
            output.push(' ');
            output.push_str(metric.descriptor.metric_type.as_prometheus_type());
            output.push('\n');

            for sample in metric.samples {
                output.push_str(&render_sample_line(
                    &metric.descriptor.name,
                    &sample.labels,
                    sample.value.get(),
                ));
            }
        }

        output
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state.read().map_err(|_| {
            ScrapromError::InternalError("metrics registry lock poisoned".to_string())
        })
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state.write().map_err(|_| {
            ScrapromError::InternalError("metrics registry lock poisoned".to_string())
        })
    }
}

fn warn_on_mismatch(
    key: &str,
    existing: &MetricHandle,
    metric_type: MetricType,
    label_names: &[&str],
) {
    let descriptor = existing.registered().descriptor();
    let labels_match = descriptor
        .variable_labels
        .iter()
        .map(String::as_str)
        .eq(label_names.iter().copied());
    if descriptor.metric_type != metric_type || !labels_match {
        warn!(
            key = %key,
            registered = ?descriptor.metric_type,
            requested = ?metric_type,
            "stat key already registered with a different metric schema, keeping the first"
        );
    }
}

/// `f64` stored as raw bits so series can be updated without a lock.
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

struct Series {
    descriptor: MetricDescriptor,
    values: RwLock<HashMap<LabelValues, Arc<AtomicF64>>>,
}

impl Series {
    fn new(name: &str, help: &str, metric_type: MetricType, variable_labels: &[&str]) -> Self {
        Self {
            descriptor: MetricDescriptor {
                name: name.to_string(),
                help: help.to_string(),
                metric_type,
                variable_labels: variable_labels.iter().map(|label| (*label).to_string()).collect(),
            },
            values: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, labels: &[&str]) -> Arc<AtomicF64> {
        let label_values = normalize_labels(&self.descriptor, labels);
        if let Ok(guard) = self.values.read()
            && let Some(existing) = guard.get(&label_values)
        {
            return existing.clone();
        }

        match self.values.write() {
            Ok(mut guard) => guard
                .entry(label_values)
                .or_insert_with(|| Arc::new(AtomicF64::new(0.0)))
                .clone(),
            Err(_) => Arc::new(AtomicF64::new(0.0)),
        }
    }

    fn get(&self, labels: &[&str]) -> Option<f64> {
        let label_values = normalize_labels(&self.descriptor, labels);
        self.values
            .read()
            .ok()?
            .get(&label_values)
            .map(|value| value.load())
    }

    fn collect(&self, wrap: fn(f64) -> MetricValue) -> Vec<MetricSample> {
        let values = match self.values.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        values
            .iter()
            .map(|(label_values, value)| MetricSample {
                labels: materialize_labels(&self.descriptor, label_values),
                value: wrap(value.load()),
            })
            .collect()
    }
}

pub struct CounterMetric {
    series: Series,
}

impl CounterMetric {
    fn new(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self {
            series: Series::new(name, help, MetricType::Counter, variable_labels),
        }
    }

    /// Adds `value` to the series for `labels`. Negative and NaN increments
    /// are dropped so the counter never decreases.
    pub fn inc(&self, labels: &[&str], value: f64) {
        if value.is_nan() || value < 0.0 {
            return;
        }
        self.series.get_or_create(labels).fetch_add(value);
    }

    pub fn inc_one(&self, labels: &[&str]) {
        self.inc(labels, 1.0);
    }

    pub fn get(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels)
    }
}

impl RegisteredMetric for CounterMetric {
    fn descriptor(&self) -> MetricDescriptor {
        self.series.descriptor.clone()
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.series.collect(MetricValue::Counter)
    }
}

pub struct GaugeMetric {
    series: Series,
}

impl GaugeMetric {
    fn new(name: &str, help: &str, variable_labels: &[&str]) -> Self {
        Self {
            series: Series::new(name, help, MetricType::Gauge, variable_labels),
        }
    }

    pub fn set(&self, labels: &[&str], value: f64) {
        self.series.get_or_create(labels).store(value);
    }

    pub fn inc(&self, labels: &[&str], value: f64) {
        self.series.get_or_create(labels).fetch_add(value);
    }

    pub fn get(&self, labels: &[&str]) -> Option<f64> {
        self.series.get(labels)
    }
}

impl RegisteredMetric for GaugeMetric {
    fn descriptor(&self) -> MetricDescriptor {
        self.series.descriptor.clone()
    }

    fn collect(&self) -> Vec<MetricSample> {
        self.series.collect(MetricValue::Gauge)
    }
}

fn normalize_labels(descriptor: &MetricDescriptor, labels: &[&str]) -> LabelValues {
    let expected = descriptor.variable_labels.len();
    (0..expected)
        .map(|index| labels.get(index).copied().unwrap_or_default().to_string())
        .collect()
}

fn materialize_labels(descriptor: &MetricDescriptor, values: &[String]) -> Vec<(String, String)> {
    descriptor
        .variable_labels
        .iter()
        .zip(values.iter())
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn render_sample_line(name: &str, labels: &[(String, String)], value: f64) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);

    if !labels.is_empty() {
        rendered.push('{');
        for (index, (key, value)) in labels.iter().enumerate() {
            if index > 0 {
                rendered.push(',');
            }
            rendered.push_str(key);
            rendered.push_str("=\"");
            rendered.push_str(&escape_label_value(value));
            rendered.push('"');
        }
        rendered.push('}');
    }

    rendered.push(' ');
    rendered.push_str(&format_metric_value(value));
    rendered.push('\n');
    rendered
}

fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use scraprom_common::ScrapromError;

    use super::{MetricHandle, MetricsRegistry, format_metric_value};
    use crate::types::MetricType;

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = MetricsRegistry::new("scraprom");
        let first = registry
            .get_or_create("downloader/request_count", MetricType::Counter, &["spider"])
            .unwrap();
        let second = registry
            .get_or_create("downloader/request_count", MetricType::Counter, &["spider"])
            .unwrap();

        assert!(first.same_instance(&second));
        assert_eq!(first.name(), "scraprom_downloader_request_count");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn first_registration_wins_on_type_mismatch() {
        let registry = MetricsRegistry::new("scraprom");
        let gauge = registry
            .get_or_create("memusage/max", MetricType::Gauge, &["spider"])
            .unwrap();
        let again = registry
            .get_or_create("memusage/max", MetricType::Counter, &["spider", "extra"])
            .unwrap();

        assert!(gauge.same_instance(&again));
        assert_eq!(again.metric_type(), MetricType::Gauge);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_creation_yields_one_metric() {
        let registry = Arc::new(MetricsRegistry::new("scraprom"));
        let handles = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry
                        .get_or_create("item_scraped_count", MetricType::Counter, &["spider"])
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        let metrics: Vec<MetricHandle> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert!(metrics.iter().all(|metric| metric.same_instance(&metrics[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_names_surface_as_construction_errors() {
        let registry = MetricsRegistry::new("scraprom");
        let err = registry
            .get_or_create(
                "downloader/exception_type_count/twisted.internet.error.TimeoutError",
                MetricType::Counter,
                &["spider"],
            )
            .unwrap_err();
        assert!(matches!(err, ScrapromError::InvalidMetricName(_)));
        assert!(err.is_construction_error());

        let err = registry
            .get_or_create("retry/count", MetricType::Counter, &["bad-label"])
            .unwrap_err();
        assert!(matches!(err, ScrapromError::InvalidLabelName { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn colliding_names_are_rejected() {
        let registry = MetricsRegistry::new("scraprom");
        registry
            .get_or_create("retry/count", MetricType::Counter, &["spider"])
            .unwrap();
        let err = registry
            .get_or_create("retry_count", MetricType::Counter, &["spider"])
            .unwrap_err();

        match err {
            ScrapromError::DuplicateMetric { name, existing_key } => {
                assert_eq!(name, "scraprom_retry_count");
                assert_eq!(existing_key, "retry/count");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn counter_ignores_negative_increments() {
        let registry = MetricsRegistry::new("scraprom");
        let MetricHandle::Counter(counter) = registry
            .get_or_create("log_count/INFO", MetricType::Counter, &["spider"])
            .unwrap()
        else {
            panic!("expected a counter");
        };

        counter.inc(&["a"], 2.0);
        counter.inc(&["a"], -5.0);
        counter.inc(&["a"], f64::NAN);
        counter.inc_one(&["a"]);
        assert_eq!(counter.get(&["a"]), Some(3.0));
    }

    #[test]
    fn renders_exposition_text() {
        let registry = MetricsRegistry::new("scraprom");
        let MetricHandle::Counter(counter) = registry
            .get_or_create("downloader/request_count", MetricType::Counter, &["spider"])
            .unwrap()
        else {
            panic!("expected a counter");
        };
        let MetricHandle::Gauge(gauge) = registry
            .get_or_create("memusage/max", MetricType::Gauge, &["spider"])
            .unwrap()
        else {
            panic!("expected a gauge");
        };

        counter.inc(&[""], 3.0);
        gauge.set(&["spider\"A"], 1048576.0);
        gauge.set(&["b"], 0.25);

        let rendered = registry.render_prometheus();
        let expected = "\
# HELP scraprom_downloader_request_count downloader/request_count
# TYPE scraprom_downloader_request_count counter
scraprom_downloader_request_count{spider=\"\"} 3
# HELP scraprom_memusage_max memusage/max
# TYPE scraprom_memusage_max gauge
scraprom_memusage_max{spider=\"b\"} 0.25
scraprom_memusage_max{spider=\"spider\\\"A\"} 1048576
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn formats_special_values() {
        assert_eq!(format_metric_value(f64::INFINITY), "+Inf");
        assert_eq!(format_metric_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_metric_value(f64::NAN), "NaN");
        assert_eq!(format_metric_value(-4.0), "-4");
        assert_eq!(format_metric_value(1.5), "1.5");
    }
}
