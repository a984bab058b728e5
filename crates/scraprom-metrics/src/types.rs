/// Content type of the text exposition format, version 0.0.4.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    pub variable_labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
}

impl MetricValue {
    pub fn get(&self) -> f64 {
        match self {
            Self::Counter(value) | Self::Gauge(value) => *value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricSample {
    pub labels: Vec<(String, String)>,
    pub value: MetricValue,
}

#[derive(Debug, Clone)]
pub struct CollectedMetric {
    pub descriptor: MetricDescriptor,
    pub samples: Vec<MetricSample>,
}
