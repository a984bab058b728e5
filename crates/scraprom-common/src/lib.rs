pub mod config;
pub mod error;

pub use config::{DeliveryMode, PushMethod, ScrapromConfig};
pub use error::{Result, ScrapromError};
