// SPDX-License-Identifier: AGPL-3.0
// Reed Torrent Core - Human-readable formatting

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Format a byte count with a binary unit and two decimals
pub fn format_size(bytes: u64) -> String {
    let (divisor, unit) = match bytes {
        b if b >= TB => (TB, "TB"),
        b if b >= GB => (GB, "GB"),
        b if b >= MB => (MB, "MB"),
        b if b >= KB => (KB, "KB"),
        _ => (1, "B"),
    };

    format!("{:.2} {}", bytes as f64 / divisor as f64, unit)
}

/// Format a transfer rate in bytes per second
pub fn format_rate(bytes_per_sec: u64) -> String {
    if bytes_per_sec == 0 {
        return "0 B/s".to_string();
    }
    format!("{}/s", format_size(bytes_per_sec))
}

/// Format a remaining duration by magnitude.
///
/// The unit is picked after rounding, so 59.7 seconds reads "1.0 min".
pub fn format_eta(seconds: f64) -> String {
    let whole_seconds = seconds.round();
    if whole_seconds < 60.0 {
        return format!("{:.0} sec", whole_seconds);
    }

    let minutes = round_tenths(seconds / 60.0);
    if minutes < 60.0 {
        return format!("{:.1} min", minutes);
    }

    let hours = round_tenths(seconds / 3600.0);
    if hours < 24.0 {
        return format!("{:.1} hours", hours);
    }

    format!("{:.1} days", round_tenths(seconds / 86400.0))
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
