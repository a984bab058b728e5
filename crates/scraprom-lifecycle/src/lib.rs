pub mod collector;
pub mod controller;
pub mod signals;

pub use collector::PromStatsCollector;
pub use controller::LifecycleController;
pub use signals::{WorkObserver, WorkSignals};
