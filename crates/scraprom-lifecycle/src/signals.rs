use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use scraprom_common::error::Result;
use tracing::warn;

/// Receives the host's work start/stop signals.
#[async_trait]
pub trait WorkObserver: Send + Sync {
    async fn on_work_started(&self) -> Result<()>;
    async fn on_work_stopped(&self);
}

/// Fan-out of work signals to connected observers, in connection order.
#[derive(Default)]
pub struct WorkSignals {
    observers: RwLock<Vec<Arc<dyn WorkObserver>>>,
}

impl WorkSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, observer: Arc<dyn WorkObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().map(|observers| observers.len()).unwrap_or(0)
    }

    /// Notifies every observer; the first failure is returned once all have run.
    pub async fn emit_started(&self) -> Result<()> {
        let mut first_error = None;
        for observer in self.snapshot() {
            if let Err(err) = observer.on_work_started().await {
                warn!(error = %err, "work observer failed to start");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn emit_stopped(&self) {
        for observer in self.snapshot() {
            observer.on_work_stopped().await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn WorkObserver>> {
        self.observers
            .read()
            .map(|observers| observers.clone())
            .unwrap_or_default()
    }
}
