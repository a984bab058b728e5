pub mod naming;
pub mod registry;
pub mod types;

pub use naming::{KEY_DELIMITER, is_valid_metric_name, metric_name};
pub use registry::{CounterMetric, GaugeMetric, MetricHandle, MetricsRegistry};
pub use types::{
    CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue, TEXT_CONTENT_TYPE,
};
