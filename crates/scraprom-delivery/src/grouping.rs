use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sysinfo::System;
use tracing::warn;

/// Labels identifying this process to the push gateway, sorted by name.
pub type GroupingKey = BTreeMap<String, String>;

const PATH_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

pub fn default_grouping_key() -> GroupingKey {
    GroupingKey::from([("instance".to_string(), hostname())])
}

/// Local host name, or an empty string when it cannot be read.
pub fn hostname() -> String {
    System::host_name().unwrap_or_else(|| {
        warn!("hostname lookup failed");
        String::new()
    })
}

/// Gateway endpoint for `job` and `grouping_key`:
/// `<gateway>/metrics/job/<job>[/<name>/<value>...]`, with `http://` added
/// when the gateway has no scheme.
pub fn push_url(gateway: &str, job: &str, grouping_key: &GroupingKey) -> String {
    let gateway = gateway.trim().trim_end_matches('/');
    let mut url = if gateway.starts_with("http://") || gateway.starts_with("https://") {
        gateway.to_string()
    } else {
        format!("http://{gateway}")
    };

    let (job_key, job_value) = escape_grouping_pair("job", job);
    url.push_str(&format!("/metrics/{job_key}/{job_value}"));
    for (name, value) in grouping_key {
        let (name, value) = escape_grouping_pair(name, value);
        url.push_str(&format!("/{name}/{value}"));
    }
    url
}

fn escape_grouping_pair(name: &str, value: &str) -> (String, String) {
    if value.is_empty() {
        // an empty path segment would be dropped, so it travels as base64
        (format!("{name}@base64"), "=".to_string())
    } else if value.contains('/') {
        (format!("{name}@base64"), URL_SAFE.encode(value))
    } else {
        (name.to_string(), utf8_percent_encode(value, PATH_VALUE).to_string())
    }
}
