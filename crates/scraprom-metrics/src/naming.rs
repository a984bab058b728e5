/// Separator between the segments of a stat key.
pub const KEY_DELIMITER: char = '/';

/// Maps a stat key such as `downloader/response_count` to
/// `<prefix>_downloader_response_count`, lower-cased.
///
/// Never fails: keys that still contain characters outside the exposition
/// name charset are caught by [`is_valid_metric_name`] at registration.
pub fn metric_name(prefix: &str, key: &str) -> String {
    format!("{prefix}_{}", key.replace(KEY_DELIMITER, "_")).to_lowercase()
}

pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ':')
}
