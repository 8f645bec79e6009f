//! Human-readable durations and timestamps.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Format a job runtime: `850ms`, `42s`, `17m 03s`, `5h 12m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs < 60 {
        return format!("{}s", secs);
    }
    let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
    if hours == 0 {
        format!("{}m {:02}s", mins, secs % 60)
    } else {
        format!("{}h {:02}m", hours, mins)
    }
}

/// Format a timestamp relative to now: `just now`, `3 minutes ago`, ...
pub fn format_relative_time(timestamp: DateTime<Utc>) -> String {
    let seconds = Utc::now().signed_duration_since(timestamp).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", n, unit)
        }
    };

    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = hours / 24;
    if days == 1 {
        return "yesterday".to_string();
    }
    plural(days, "day")
}
