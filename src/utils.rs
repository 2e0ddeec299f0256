//! Small helpers shared across modules.

use std::path::Path;

/// File name without directories, for compact log lines and thread names.
pub fn short_filename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Compact `mm:ss.mmm` rendering of a time in seconds, for log lines.
pub fn abbrev_time(t: f64) -> String {
    let total_ms = (t.abs() * 1000.0).round() as u64;
    let sign = if t < 0.0 { "-" } else { "" };
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{}{:02}:{:02}.{:03}", sign, minutes, seconds, millis)
}
