//! Utility functions shared by the ledger crates

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current timestamp in milliseconds
pub fn timestamp_ms() -> u64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    (since_epoch.as_secs() * 1000) + (since_epoch.subsec_nanos() as u64 / 1_000_000)
}

/// Get the current timestamp in seconds
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Escape an identifier so it can be used as a single storage key segment.
///
/// `%`, `/` and a leading `.` are percent-encoded, so no identifier can
/// turn into `.` or `..` on a file system. Everything else passes through.
pub fn key_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, c) in id.chars().enumerate() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '.' if i == 0 => out.push_str("%2E"),
            _ => out.push(c),
        }
    }
    out
}
