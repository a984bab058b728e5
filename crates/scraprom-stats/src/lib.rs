pub mod adapter;
pub mod source;
pub mod store;
pub mod value;

pub use adapter::StatsAdapter;
pub use source::ActiveSource;
pub use store::MemoryStatsStore;
pub use value::StatValue;
