use std::{cmp::Ordering, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value held by the stats store. Only `Int` and `Float` are mirrored to metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl StatValue {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Timestamp(_) | Self::Text(_) => None,
        }
    }

    /// Numeric sum; integers stay integers until they would overflow.
    pub fn checked_add(&self, other: &StatValue) -> Option<StatValue> {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => Some(
                left.checked_add(*right)
                    .map(Self::Int)
                    .unwrap_or(Self::Float(*left as f64 + *right as f64)),
            ),
            _ => Some(Self::Float(self.as_f64()? + other.as_f64()?)),
        }
    }

    /// Ordering between values of comparable kinds; `None` for mixed kinds.
    pub fn compare(&self, other: &StatValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => Some(left.cmp(right)),
            (Self::Timestamp(left), Self::Timestamp(right)) => Some(left.cmp(right)),
            (Self::Text(left), Self::Text(right)) => Some(left.cmp(right)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for StatValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for StatValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for StatValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u64> for StatValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(Self::Int)
            .unwrap_or(Self::Float(value as f64))
    }
}

impl From<usize> for StatValue {
    fn from(value: usize) -> Self {
        (value as u64).into()
    }
}

impl From<f64> for StatValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for StatValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StatValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for StatValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}
