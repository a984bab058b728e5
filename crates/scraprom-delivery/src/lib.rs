pub mod grouping;
pub mod pull;
pub mod push;
pub mod scheduler;

pub use grouping::{GroupingKey, default_grouping_key, hostname, push_url};
pub use pull::{MetricsServer, metrics_router};
pub use push::PushGateway;
pub use scheduler::{DeliveryScheduler, DeliveryStats};
