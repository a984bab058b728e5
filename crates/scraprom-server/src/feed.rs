use scraprom_common::error::{Result, ScrapromError};
use scraprom_stats::{StatValue, StatsAdapter};
use serde::Deserialize;

/// One stats event read from the producer, e.g.
/// `{"op":"inc","key":"downloader/request_count","source":"books"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum StatEvent {
    Set {
        key: String,
        value: StatValue,
        #[serde(default)]
        source: Option<String>,
    },
    Inc {
        key: String,
        #[serde(default = "default_count")]
        count: StatValue,
        #[serde(default = "default_start")]
        start: StatValue,
        #[serde(default)]
        source: Option<String>,
    },
    Max {
        key: String,
        value: StatValue,
        #[serde(default)]
        source: Option<String>,
    },
    Min {
        key: String,
        value: StatValue,
        #[serde(default)]
        source: Option<String>,
    },
    Open {
        source: String,
    },
    Close {
        source: String,
    },
}

fn default_count() -> StatValue {
    StatValue::Int(1)
}

fn default_start() -> StatValue {
    StatValue::Int(0)
}

/// Decodes one raw input line. Lines that are not UTF-8 are rejected on their own.
pub fn decode_line(raw: Vec<u8>) -> Result<String> {
    String::from_utf8(raw)
        .map_err(|err| ScrapromError::InvalidArgument(format!("stats event is not utf-8: {err}")))
}

pub fn parse_line(line: &str) -> Result<StatEvent> {
    serde_json::from_str(line)
        .map_err(|err| ScrapromError::InvalidArgument(format!("invalid stats event: {err}")))
}

pub fn apply(stats: &StatsAdapter, event: StatEvent) -> Result<()> {
    match event {
        StatEvent::Set { key, value, source } => stats.set_value(&key, value, source.as_deref()),
        StatEvent::Inc {
            key,
            count,
            start,
            source,
        } => stats.increment_value(&key, count, start, source.as_deref()),
        StatEvent::Max { key, value, source } => {
            stats.track_maximum(&key, value, source.as_deref())
        }
        StatEvent::Min { key, value, source } => {
            stats.track_minimum(&key, value, source.as_deref())
        }
        StatEvent::Open { source } => {
            stats.open_source(&source);
            Ok(())
        }
        StatEvent::Close { source } => stats.close_source(&source),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scraprom_metrics::MetricsRegistry;
    use scraprom_stats::{MemoryStatsStore, StatValue, StatsAdapter};

    use super::{StatEvent, apply, decode_line, parse_line};

    #[test]
    fn parses_events_with_defaults() {
        assert_eq!(
            parse_line(r#"{"op":"inc","key":"log_count/INFO"}"#).unwrap(),
            StatEvent::Inc {
                key: "log_count/INFO".to_string(),
                count: StatValue::Int(1),
                start: StatValue::Int(0),
                source: None,
            }
        );
        assert!(matches!(
            parse_line(r#"{"op":"set","key":"start_time","value":"2024-05-01T10:00:00Z"}"#)
                .unwrap(),
            StatEvent::Set {
                value: StatValue::Timestamp(_),
                ..
            }
        ));
        assert!(parse_line(r#"{"op":"explode","key":"x"}"#).is_err());
        assert!(parse_line("not json").is_err());
    }

    #[test]
    fn bad_encoding_rejects_only_its_line() {
        let raw: &[u8] =
            b"{\"op\":\"inc\",\"key\":\"a\"}\n\xff\xfe\n{\"op\":\"inc\",\"key\":\"b\"}\n";
        let decoded = raw
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| decode_line(line.to_vec()))
            .collect::<Vec<_>>();

        assert_eq!(decoded.len(), 3);
        assert!(decoded[1].is_err());
        let stats = StatsAdapter::new(
            Arc::new(MemoryStatsStore::new()),
            Arc::new(MetricsRegistry::new("scraprom")),
            "spider",
        );
        for line in decoded.into_iter().flatten() {
            apply(&stats, parse_line(&line).unwrap()).unwrap();
        }
        assert_eq!(stats.get_value("a"), Some(StatValue::Int(1)));
        assert_eq!(stats.get_value("b"), Some(StatValue::Int(1)));
    }

    #[test]
    fn applies_events_to_adapter() {
        let stats = StatsAdapter::new(
            Arc::new(MemoryStatsStore::new()),
            Arc::new(MetricsRegistry::new("scraprom")),
            "spider",
        );
        let lines = [
            r#"{"op":"open","source":"books"}"#,
            r#"{"op":"inc","key":"item_scraped_count","count":2}"#,
            r#"{"op":"max","key":"request_depth_max","value":3}"#,
            r#"{"op":"min","key":"request_depth_max","value":1}"#,
            r#"{"op":"set","key":"finish_reason","value":"finished"}"#,
            r#"{"op":"close","source":"books"}"#,
        ];
        for line in lines {
            apply(&stats, parse_line(line).unwrap()).unwrap();
        }

        let rendered = stats.registry().render_prometheus();
        assert!(rendered.contains("scraprom_item_scraped_count{spider=\"books\"} 2\n"));
        assert!(rendered.contains("scraprom_request_depth_max{spider=\"books\"} 1\n"));
        assert!(!rendered.contains("finish_reason"));
        assert!(stats.active_source().is_none());
    }
}
