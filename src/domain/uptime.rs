use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UptimeWindow {
    Daily,
    Weekly,
}

impl UptimeWindow {
    pub fn length(self) -> Duration {
        match self {
            Self::Daily => Duration::days(1),
            Self::Weekly => Duration::days(7),
        }
    }
}

/// A closed or still-running offline period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfflineInterval {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Offline time inside `[now - window, now]`. Open intervals run until `now`.
pub fn offline_duration(
    intervals: &[OfflineInterval],
    window: UptimeWindow,
    now: DateTime<Utc>,
) -> Duration {
    let window_start = now - window.length();

    intervals
        .iter()
        .map(|interval| {
            let start = interval.started_at.max(window_start);
            let end = interval.ended_at.unwrap_or(now).min(now);
            (end - start).max(Duration::zero())
        })
        .fold(Duration::zero(), |total, part| total + part)
}

pub fn uptime_percent(offline: Duration, window: UptimeWindow) -> f64 {
    let window_minutes = window.length().num_minutes() as f64;
    let offline_minutes = offline.num_seconds() as f64 / 60.0;
    ((window_minutes - offline_minutes) / window_minutes * 100.0).clamp(0.0, 100.0)
}
