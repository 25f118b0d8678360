//! Period statistics over completed work sessions

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{SessionStatus, WorkSession};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeriodStats {
    pub today_seconds: u64,
    pub week_seconds: u64,
    pub today_sessions: usize,
    pub week_sessions: usize,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Start of the UTC day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Monday 00:00 UTC of the week containing `now`.
pub fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday();
    start_of_day(now) - Duration::days(days_from_monday as i64)
}

impl PeriodStats {
    /// Sum completed sessions into today/this-week buckets by start time.
    pub fn from_sessions(sessions: &[WorkSession], now: DateTime<Utc>) -> Self {
        let day = start_of_day(now);
        let week = start_of_week(now);
        let mut stats = Self {
            computed_at: Some(now),
            ..Self::default()
        };

        for session in sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
        {
            if session.start_time >= week && session.start_time <= now {
                stats.week_seconds += session.duration_seconds;
                stats.week_sessions += 1;

                if session.start_time >= day {
                    stats.today_seconds += session.duration_seconds;
                    stats.today_sessions += 1;
                }
            }
        }

        stats
    }

    pub fn today_hours(&self) -> f64 {
        (self.today_seconds as f64 / 3600.0 * 100.0).round() / 100.0
    }

    pub fn week_hours(&self) -> f64 {
        (self.week_seconds as f64 / 3600.0 * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session(start: DateTime<Utc>, secs: u64, status: SessionStatus) -> WorkSession {
        WorkSession {
            id: uuid::Uuid::new_v4().to_string(),
            start_time: start,
            end_time: Some(start + Duration::seconds(secs as i64)),
            duration_seconds: secs,
            status,
        }
    }

    #[test]
    fn test_windows() {
        // Thursday
        let now = Utc.with_ymd_and_hms(2024, 5, 16, 15, 30, 0).unwrap();
        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2024, 5, 16, 0, 0, 0).unwrap()
        );
        assert_eq!(
            start_of_week(now),
            Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_sums_only_completed_sessions_in_window() {
        let now = Utc.with_ymd_and_hms(2024, 5, 16, 15, 30, 0).unwrap();
        let sessions = vec![
            session(now - Duration::hours(2), 3600, SessionStatus::Completed),
            session(now - Duration::days(1), 1800, SessionStatus::Completed),
            session(now - Duration::days(5), 900, SessionStatus::Completed),
            session(now - Duration::minutes(5), 300, SessionStatus::Active),
        ];

        let stats = PeriodStats::from_sessions(&sessions, now);
        assert_eq!(stats.today_seconds, 3600);
        assert_eq!(stats.today_sessions, 1);
        assert_eq!(stats.week_seconds, 5400);
        assert_eq!(stats.week_sessions, 2);
        assert_eq!(stats.today_hours(), 1.0);
        assert_eq!(stats.week_hours(), 1.5);
    }
}
