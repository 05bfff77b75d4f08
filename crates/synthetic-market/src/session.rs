use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::ConfigError;

const SECONDS_PER_DAY: i64 = 86_400;
/// Volume intensity outside regular hours
const OFF_HOURS_INTENSITY: f64 = 0.15;

/// Trading-hours window in an exchange time zone.
///
/// The synthetic market trades every calendar day; the session only shapes
/// intraday volume and decides where overnight gaps may occur.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
}

impl Default for SessionCalendar {
    fn default() -> Self {
        Self::us_equities()
    }
}

impl SessionCalendar {
    /// New York 09:30-16:00.
    pub fn us_equities() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
        }
    }

    /// Parse a calendar from an IANA zone name and `HH:MM` open/close times.
    pub fn parse(tz: &str, open: &str, close: &str) -> Result<Self, ConfigError> {
        let tz: Tz = tz.parse().map_err(|_| ConfigError::InvalidField {
            field: "session_tz",
            reason: format!("unknown time zone '{}'", tz),
        })?;
        let parse_time = |field: &'static str, value: &str| {
            NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| ConfigError::InvalidField {
                field,
                reason: format!("'{}': {}", value, e),
            })
        };
        let open = parse_time("session_open", open)?;
        let close = parse_time("session_close", close)?;
        if open == close {
            return Err(ConfigError::InvalidField {
                field: "session_close",
                reason: "session open and close are equal".to_string(),
            });
        }
        Ok(Self { tz, open, close })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Length of the regular session in minutes.
    pub fn session_minutes(&self) -> f64 {
        let minutes = self.close.signed_duration_since(self.open).num_minutes();
        if minutes > 0 {
            minutes as f64
        } else {
            (minutes + 24 * 60) as f64
        }
    }

    /// Whether a session open falls inside `[bar_start, bar_start + bar_secs)`.
    pub fn contains_open(&self, bar_start: DateTime<Utc>, bar_secs: i64) -> bool {
        let bar_secs = bar_secs.max(1);
        let Some(bar_end) = bar_start.checked_add_signed(Duration::seconds(bar_secs)) else {
            return false;
        };

        // A local day's open can precede the UTC bar start by at most a day.
        let first_day = bar_start.with_timezone(&self.tz).date_naive() - Duration::days(1);
        let days = bar_secs / SECONDS_PER_DAY + 2;

        (0..=days).any(|offset| {
            let day = first_day + Duration::days(offset);
            self.tz
                .from_local_datetime(&day.and_time(self.open))
                .earliest()
                .map(|open| {
                    let open = open.with_timezone(&Utc);
                    open >= bar_start && open < bar_end
                })
                .unwrap_or(false)
        })
    }

    /// U-shaped intraday volume intensity for a bar.
    ///
    /// Busy near the open and close, quiet mid-session, low outside hours.
    /// Daily and longer bars always get 1.0.
    pub fn time_of_day_multiplier(&self, bar_start: DateTime<Utc>, bar_secs: i64) -> f64 {
        if bar_secs >= SECONDS_PER_DAY {
            return 1.0;
        }
        let midpoint = bar_start + Duration::seconds(bar_secs.max(1) / 2);
        let local = midpoint.with_timezone(&self.tz).time();

        let Some(since_open) = self.minutes_into_session(local) else {
            return OFF_HOURS_INTENSITY;
        };
        let until_close = (self.session_minutes() - since_open).max(0.0);
        1.0 + 1.2 * (-since_open / 30.0).exp() + 0.8 * (-until_close / 30.0).exp()
    }

    /// Minutes since the open if `local` is inside the session.
    fn minutes_into_session(&self, local: NaiveTime) -> Option<f64> {
        let since_open = local.signed_duration_since(self.open).num_seconds() as f64 / 60.0;
        let since_open = if since_open < 0.0 { since_open + 24.0 * 60.0 } else { since_open };
        (since_open < self.session_minutes()).then_some(since_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        // 2024-03-12: New York is on EDT (UTC-4)
        Utc.with_ymd_and_hms(2024, 3, 12, h, m, 0).unwrap()
    }

    #[test]
    fn test_contains_open_intraday() {
        let cal = SessionCalendar::us_equities();
        assert!(cal.contains_open(utc(13, 30), 300));
        assert!(cal.contains_open(utc(13, 0), 3600));
        assert!(!cal.contains_open(utc(13, 35), 300));
        assert!(!cal.contains_open(utc(13, 25), 300));
    }

    #[test]
    fn test_daily_bar_contains_open() {
        let cal = SessionCalendar::us_equities();
        assert!(cal.contains_open(utc(0, 0), SECONDS_PER_DAY));
    }

    #[test]
    fn test_winter_offset() {
        let cal = SessionCalendar::us_equities();
        // EST (UTC-5): open at 14:30 UTC
        let jan = Utc.with_ymd_and_hms(2024, 1, 10, 14, 30, 0).unwrap();
        assert!(cal.contains_open(jan, 60));
    }

    #[test]
    fn test_u_shaped_volume() {
        let cal = SessionCalendar::us_equities();
        let open = cal.time_of_day_multiplier(utc(13, 30), 300);
        let midday = cal.time_of_day_multiplier(utc(16, 30), 300);
        let late = cal.time_of_day_multiplier(utc(19, 55), 300);
        let night = cal.time_of_day_multiplier(utc(3, 0), 300);

        assert!(open > midday);
        assert!(late > midday);
        assert!(open > late);
        assert_eq!(night, OFF_HOURS_INTENSITY);
        assert_eq!(cal.time_of_day_multiplier(utc(0, 0), SECONDS_PER_DAY), 1.0);
    }

    #[test]
    fn test_parse() {
        let cal = SessionCalendar::parse("Europe/London", "08:00", "16:30").unwrap();
        assert_eq!(cal.session_minutes(), 510.0);
        assert!(SessionCalendar::parse("Mars/Olympus", "08:00", "16:30").is_err());
        assert!(SessionCalendar::parse("UTC", "8am", "16:30").is_err());
    }

    #[test]
    fn test_overnight_session() {
        let cal = SessionCalendar::parse("UTC", "22:00", "04:00").unwrap();
        assert_eq!(cal.session_minutes(), 360.0);
        assert!(cal.time_of_day_multiplier(utc(23, 0), 300) > OFF_HOURS_INTENSITY);
        assert_eq!(cal.time_of_day_multiplier(utc(12, 0), 300), OFF_HOURS_INTENSITY);
    }
}
