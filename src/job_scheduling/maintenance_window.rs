//! Maintenance window evaluation
//!
//! Windows are recurring daily UTC blackout periods. Dispatch during a window
//! is deferred until the window closes. A window may run past midnight, so
//! both the occurrence that started today and the one that started yesterday
//! are considered.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::defaults::MAX_WINDOW_DURATION_MINUTES;
use crate::errors::ConfigError;

/// A configured window: `start_utc` as `"HH:MM"` plus a length in minutes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub start_utc: String,
    pub duration_minutes: u32,
}

impl MaintenanceWindow {
    pub fn new(start_utc: impl Into<String>, duration_minutes: u32) -> Self {
        Self {
            start_utc: start_utc.into(),
            duration_minutes,
        }
    }
}

/// Result of evaluating the windows at an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStatus {
    pub in_window: bool,
    /// End of the matching window occurrence
    pub resume_at: Option<DateTime<Utc>>,
}

impl WindowStatus {
    fn open() -> Self {
        Self {
            in_window: false,
            resume_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ParsedWindow {
    start: NaiveTime,
    duration: Duration,
}

/// Validated, immutable set of maintenance windows
#[derive(Debug, Clone, Default)]
pub struct MaintenanceSchedule {
    windows: Vec<ParsedWindow>,
}

impl MaintenanceSchedule {
    pub fn new(windows: &[MaintenanceWindow]) -> Result<Self, ConfigError> {
        let windows = windows
            .iter()
            .map(parse_window)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { windows })
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Evaluate the windows at `now`; the first matching window wins
    pub fn status(&self, now: DateTime<Utc>) -> WindowStatus {
        let today = now.date_naive();

        for window in &self.windows {
            let started_today = today.and_time(window.start).and_utc();
            let started_yesterday = started_today - Duration::days(1);

            for start in [started_today, started_yesterday] {
                let end = start + window.duration;
                if start <= now && now < end {
                    return WindowStatus {
                        in_window: true,
                        resume_at: Some(end),
                    };
                }
            }
        }

        WindowStatus::open()
    }
}

fn parse_window(window: &MaintenanceWindow) -> Result<ParsedWindow, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidWindow {
        start_utc: window.start_utc.clone(),
        message: message.to_string(),
    };

    let (hours, minutes) = window
        .start_utc
        .trim()
        .split_once(':')
        .ok_or_else(|| invalid("expected HH:MM"))?;

    let hours: u32 = hours.parse().map_err(|_| invalid("hour is not a number"))?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid("minute is not a number"))?;

    let start = NaiveTime::from_hms_opt(hours, minutes, 0)
        .ok_or_else(|| invalid("hour must be 0-23 and minute 0-59"))?;

    if window.duration_minutes == 0 || window.duration_minutes > MAX_WINDOW_DURATION_MINUTES {
        return Err(invalid("duration_minutes must be between 1 and 1440"));
    }

    Ok(ParsedWindow {
        start,
        duration: Duration::minutes(i64::from(window.duration_minutes)),
    })
}
