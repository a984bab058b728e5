use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use scraprom_common::error::{Result, ScrapromError};

use crate::value::StatValue;

pub type StatsSnapshot = HashMap<String, StatValue>;

/// Flat key/value stats store. Every mutation returns the value it committed.
#[derive(Default)]
pub struct MemoryStatsStore {
    stats: RwLock<StatsSnapshot>,
    source_stats: RwLock<HashMap<String, StatsSnapshot>>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_value(&self, key: &str) -> Option<StatValue> {
        self.stats.read().ok()?.get(key).cloned()
    }

    pub fn get_stats(&self) -> Result<StatsSnapshot> {
        Ok(self.stats_read()?.clone())
    }

    pub fn set_stats(&self, stats: StatsSnapshot) -> Result<()> {
        *self.stats_write()? = stats;
        Ok(())
    }

    pub fn clear_stats(&self) -> Result<()> {
        self.stats_write()?.clear();
        Ok(())
    }

    pub fn set_value(&self, key: &str, value: StatValue) -> Result<StatValue> {
        self.stats_write()?.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Adds `count` to the stored value, seeding an unset key with `start`.
    pub fn inc_value(&self, key: &str, count: &StatValue, start: &StatValue) -> Result<StatValue> {
        let mut stats = self.stats_write()?;
        let current = stats.get(key).unwrap_or(start);
        let next = current
            .checked_add(count)
            .ok_or_else(|| ScrapromError::NonNumericStat(key.to_string()))?;
        stats.insert(key.to_string(), next.clone());
        Ok(next)
    }

    pub fn max_value(&self, key: &str, value: StatValue) -> Result<StatValue> {
        self.keep_extreme(key, value, Ordering::Greater)
    }

    pub fn min_value(&self, key: &str, value: StatValue) -> Result<StatValue> {
        self.keep_extreme(key, value, Ordering::Less)
    }

    /// Keeps a copy of the current stats under `source` once its work ends.
    pub fn retain_for_source(&self, source: &str) -> Result<()> {
        let snapshot = self.get_stats()?;
        self.source_stats
            .write()
            .map_err(|_| ScrapromError::InternalError("source stats lock poisoned".to_string()))?
            .insert(source.to_string(), snapshot);
        Ok(())
    }

    pub fn source_stats(&self, source: &str) -> Option<StatsSnapshot> {
        self.source_stats.read().ok()?.get(source).cloned()
    }

    fn keep_extreme(&self, key: &str, value: StatValue, wanted: Ordering) -> Result<StatValue> {
        let mut stats = self.stats_write()?;
        let next = match stats.get(key) {
            None => value,
            Some(current) => match value.compare(current) {
                Some(ordering) if ordering == wanted => value,
                Some(_) => current.clone(),
                None => return Err(ScrapromError::IncompatibleStat(key.to_string())),
            },
        };
        stats.insert(key.to_string(), next.clone());
        Ok(next)
    }

    fn stats_read(&self) -> Result<RwLockReadGuard<'_, StatsSnapshot>> {
        self.stats
            .read()
            .map_err(|_| ScrapromError::InternalError("stats store lock poisoned".to_string()))
    }

    fn stats_write(&self) -> Result<RwLockWriteGuard<'_, StatsSnapshot>> {
        self.stats
            .write()
            .map_err(|_| ScrapromError::InternalError("stats store lock poisoned".to_string()))
    }
}
