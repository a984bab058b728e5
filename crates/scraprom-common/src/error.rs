use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapromError {
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),
    #[error("invalid label name {label:?} for metric {name}")]
    InvalidLabelName { name: String, label: String },
    #[error("metric name {name} already registered for stat key {existing_key:?}")]
    DuplicateMetric { name: String, existing_key: String },
    #[error("stat {0:?} does not hold a numeric value")]
    NonNumericStat(String),
    #[error("cannot compare values of stat {0:?}")]
    IncompatibleStat(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("push to gateway failed: {0}")]
    PushFailed(String),
    #[error("failed to bind metrics endpoint {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal error: {0}")]
    InternalError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScrapromError {
    /// Construction errors come from the registry and leave the stats store intact.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMetricName(_)
                | Self::InvalidLabelName { .. }
                | Self::DuplicateMetric { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ScrapromError>;
