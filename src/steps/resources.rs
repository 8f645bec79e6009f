//! Cluster resource profiles.

use crate::config::ResourceConfig;
use std::time::Duration;
use thiserror::Error;

/// A time limit string that is not in a recognised scheduler format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time limit '{0}' (expected [D-]HH:MM:SS, [D-]HH:MM, D-HH or minutes)")]
pub struct InvalidTimeLimit(pub String);

/// Resources requested for one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProfile {
    pub cpus: u32,
    pub memory_gb: u32,
    pub time_limit: Duration,
    pub gpus: u32,
    pub partition: Option<String>,
}

impl ResourceProfile {
    /// Build a profile from config, falling back to the scheduler-wide partition.
    pub fn from_config(
        config: &ResourceConfig,
        default_partition: Option<&str>,
    ) -> Result<Self, InvalidTimeLimit> {
        Ok(Self {
            cpus: config.cpus.max(1),
            memory_gb: config.memory_gb,
            time_limit: parse_time_limit(&config.time_limit)?,
            gpus: config.gpus,
            partition: config
                .partition
                .clone()
                .or_else(|| default_partition.map(str::to_string)),
        })
    }
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_gb: 4,
            time_limit: Duration::from_secs(3600),
            gpus: 0,
            partition: None,
        }
    }
}

/// Parse a Slurm-style time limit; zero is rejected.
///
/// Accepts `MM`, `MM:SS`, `HH:MM:SS`, `D-HH`, `D-HH:MM` and `D-HH:MM:SS`.
pub fn parse_time_limit(input: &str) -> Result<Duration, InvalidTimeLimit> {
    let limit = parse_slurm_duration(input)?;
    if limit.is_zero() {
        return Err(InvalidTimeLimit(input.to_string()));
    }
    Ok(limit)
}

/// Parse a Slurm duration such as an `Elapsed` column (zero allowed).
pub fn parse_slurm_duration(input: &str) -> Result<Duration, InvalidTimeLimit> {
    let err = || InvalidTimeLimit(input.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(err());
    }

    let number = |s: &str| -> Result<u64, InvalidTimeLimit> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        s.parse::<u64>().map_err(|_| err())
    };

    let (days, clock) = match trimmed.split_once('-') {
        Some((d, rest)) => (number(d)?, Some(rest)),
        None => (0, None),
    };

    let secs = match clock {
        Some(rest) => {
            let parts: Vec<&str> = rest.split(':').collect();
            match parts.as_slice() {
                [h] => number(h)? * 3600,
                [h, m] => number(h)? * 3600 + number(m)? * 60,
                [h, m, s] => number(h)? * 3600 + number(m)? * 60 + number(s)?,
                _ => return Err(err()),
            }
        }
        None => {
            let parts: Vec<&str> = trimmed.split(':').collect();
            match parts.as_slice() {
                [m] => number(m)? * 60,
                [m, s] => number(m)? * 60 + number(s)?,
                [h, m, s] => number(h)? * 3600 + number(m)? * 60 + number(s)?,
                _ => return Err(err()),
            }
        }
    };

    Ok(Duration::from_secs(days * 86_400 + secs))
}

/// Format a duration as `[D-]HH:MM:SS` for `sbatch --time`.
pub fn format_time_limit(limit: Duration) -> String {
    let total = limit.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}
