use super::text_enum;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(BookingStatus {
    Confirmed => "CONFIRMED", "Confirmed";
    Cancelled => "CANCELLED", "Cancelled";
    Completed => "COMPLETED", "Completed";
});

impl BookingStatus {
    pub fn can_transition(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (Self::Confirmed, Self::Cancelled | Self::Completed)
        )
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SeatBooking {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub library_id: i64,
    pub library_name: String,
    pub seat_id: i64,
    pub seat_number: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    #[sqlx(default)]
    pub status_display: String,
    #[sqlx(default)]
    pub duration_hours: f64,
    pub created_at: DateTime<Utc>,
}

impl SeatBooking {
    pub fn with_display(mut self, now: DateTime<Utc>) -> Self {
        self.duration_hours =
            ((self.end_time - self.start_time).num_minutes() as f64 / 6.0).round() / 10.0;
        self.status_display = match self.status {
            BookingStatus::Confirmed if self.start_time <= now && now < self.end_time => {
                "In Progress".to_string()
            }
            status => status.display().to_string(),
        };
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct BookingData {
    pub library_id: i64,
    pub seat_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub library: Option<i64>,
}

/// The rules a requested booking window must satisfy before any seat is
/// considered. Library hours are compared as UTC wall-clock times.
#[derive(Debug, Clone, Copy)]
pub struct BookingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct BookingRules {
    pub now: DateTime<Utc>,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub max_hours: i32,
    pub max_days_ahead: i64,
}

impl BookingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn validate(&self, rules: &BookingRules) -> Result<(), String> {
        if self.end <= self.start {
            return Err("end_time must be after start_time".into());
        }
        if self.start < rules.now {
            return Err("bookings cannot start in the past".into());
        }
        if self.start > rules.now + Duration::days(rules.max_days_ahead) {
            return Err(format!(
                "bookings can be made at most {} days ahead",
                rules.max_days_ahead
            ));
        }
        if self.end - self.start > Duration::hours(i64::from(rules.max_hours)) {
            return Err(format!(
                "bookings are limited to {} hours",
                rules.max_hours
            ));
        }
        if self.start.date_naive() != self.end.date_naive() {
            return Err("bookings must start and end on the same day".into());
        }
        if self.start.time() < rules.opening_time || self.end.time() > rules.closing_time {
            return Err(format!(
                "library is open from {} to {}",
                rules.opening_time.format("%H:%M"),
                rules.closing_time.format("%H:%M")
            ));
        }
        Ok(())
    }

    /// Half-open intervals: a booking ending at 10:00 does not clash with
    /// one starting at 10:00.
    pub fn overlaps(&self, other: &BookingWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, day, hour, minute, 0).unwrap()
    }

    fn rules() -> BookingRules {
        BookingRules {
            now: at(1, 7, 0),
            opening_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            closing_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            max_hours: 4,
            max_days_ahead: 14,
        }
    }

    #[test]
    fn test_valid_window() {
        assert!(BookingWindow::new(at(1, 9, 0), at(1, 13, 0)).validate(&rules()).is_ok());
        assert!(BookingWindow::new(at(2, 18, 0), at(2, 22, 0)).validate(&rules()).is_ok());
    }

    #[test]
    fn test_rejects_reversed_and_empty() {
        let err = BookingWindow::new(at(1, 10, 0), at(1, 10, 0)).validate(&rules());
        assert!(err.unwrap_err().contains("after start_time"));
        assert!(BookingWindow::new(at(1, 11, 0), at(1, 10, 0)).validate(&rules()).is_err());
    }

    #[test]
    fn test_rejects_past_and_far_future() {
        let mut rules = rules();
        rules.now = at(1, 12, 0);
        assert!(BookingWindow::new(at(1, 9, 0), at(1, 10, 0))
            .validate(&rules)
            .unwrap_err()
            .contains("past"));
        assert!(BookingWindow::new(at(20, 9, 0), at(20, 10, 0))
            .validate(&rules)
            .unwrap_err()
            .contains("days ahead"));
    }

    #[test]
    fn test_rejects_too_long() {
        let err = BookingWindow::new(at(1, 9, 0), at(1, 13, 1)).validate(&rules());
        assert!(err.unwrap_err().contains("4 hours"));
    }

    #[test]
    fn test_rejects_outside_hours_and_across_days() {
        assert!(BookingWindow::new(at(1, 7, 30), at(1, 9, 0)).validate(&rules()).is_err());
        assert!(BookingWindow::new(at(1, 21, 0), at(1, 22, 30)).validate(&rules()).is_err());

        let mut rules = rules();
        rules.max_hours = 24;
        rules.closing_time = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        rules.opening_time = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        assert!(BookingWindow::new(at(1, 23, 0), at(2, 1, 0))
            .validate(&rules)
            .unwrap_err()
            .contains("same day"));
    }

    #[test]
    fn test_overlaps() {
        let a = BookingWindow::new(at(1, 9, 0), at(1, 11, 0));
        let b = BookingWindow::new(at(1, 10, 0), at(1, 12, 0));
        let c = BookingWindow::new(at(1, 11, 0), at(1, 12, 0));
        let d = BookingWindow::new(at(1, 8, 0), at(1, 13, 0));

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&a));
        assert!(d.overlaps(&a));
    }

    #[test]
    fn test_transitions() {
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Cancelled));
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Completed));
        assert!(!BookingStatus::Cancelled.can_transition(BookingStatus::Confirmed));
        assert!(!BookingStatus::Completed.can_transition(BookingStatus::Cancelled));
    }
}
