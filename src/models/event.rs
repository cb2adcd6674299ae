use super::{rate, text_enum};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(EventStatus {
    Upcoming => "UPCOMING", "Upcoming";
    Ongoing => "ONGOING", "Ongoing";
    Completed => "COMPLETED", "Completed";
    Cancelled => "CANCELLED", "Cancelled";
});

impl Default for EventStatus {
    fn default() -> Self {
        Self::Upcoming
    }
}

impl EventStatus {
    pub fn at(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        is_cancelled: bool,
        now: DateTime<Utc>,
    ) -> Self {
        if is_cancelled {
            Self::Cancelled
        } else if now < start {
            Self::Upcoming
        } else if now < end {
            Self::Ongoing
        } else {
            Self::Completed
        }
    }
}

text_enum!(RegistrationStatus {
    Registered => "REGISTERED", "Registered";
    Cancelled => "CANCELLED", "Cancelled";
    Attended => "ATTENDED", "Attended";
});

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub library_id: i64,
    pub library_name: String,
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub is_premium: bool,
    pub is_cancelled: bool,
    pub registered_count: i64,
    /// Whether the requesting user holds a REGISTERED registration.
    pub is_registered: bool,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(default)]
    pub status: EventStatus,
    #[sqlx(default)]
    pub status_display: String,
    #[sqlx(default)]
    pub occupancy_rate: f64,
    #[sqlx(default)]
    pub spots_left: i64,
}

impl Event {
    pub fn with_display(mut self, now: DateTime<Utc>) -> Self {
        self.status = EventStatus::at(self.start_time, self.end_time, self.is_cancelled, now);
        self.status_display = self.status.display().to_string();
        self.occupancy_rate = rate(self.registered_count, i64::from(self.capacity));
        self.spots_left = (i64::from(self.capacity) - self.registered_count).max(0);
        self
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EventRegistration {
    pub id: i64,
    pub event_id: i64,
    pub event_title: String,
    pub event_start_time: DateTime<Utc>,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub status: RegistrationStatus,
    #[sqlx(default)]
    pub status_display: String,
    pub registered_at: DateTime<Utc>,
}

impl EventRegistration {
    pub fn with_display(mut self) -> Self {
        self.status_display = self.status.display().to_string();
        self
    }
}

/// Attendance is recorded for REGISTERED attendees once a non-cancelled
/// event has started.
pub fn check_attendance(
    status: RegistrationStatus,
    start_time: DateTime<Utc>,
    is_cancelled: bool,
    now: DateTime<Utc>,
) -> Result<(), String> {
    if is_cancelled {
        return Err("this event has been cancelled".into());
    }
    if now < start_time {
        return Err("attendance can only be recorded once the event has started".into());
    }
    match status {
        RegistrationStatus::Registered => Ok(()),
        RegistrationStatus::Attended => Err("attendance has already been recorded".into()),
        RegistrationStatus::Cancelled => Err("this registration has been cancelled".into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub library_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    #[serde(default)]
    pub is_premium: bool,
}

impl EventData {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".into());
        }
        if self.end_time <= self.start_time {
            return Err("end_time must be after start_time".into());
        }
        if self.start_time < now {
            return Err("events cannot be scheduled in the past".into());
        }
        if self.capacity <= 0 {
            return Err("capacity must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub capacity: Option<i32>,
    pub is_premium: Option<bool>,
}

impl EventUpdate {
    /// Validates the update as applied on top of `current`. Capacity may not
    /// drop below the number of people already registered.
    pub fn validate(&self, current: &Event, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err("title is required".into());
            }
        }
        if matches!(self.start_time, Some(start) if start < now) {
            return Err("events cannot be scheduled in the past".into());
        }
        let start = self.start_time.unwrap_or(current.start_time);
        let end = self.end_time.unwrap_or(current.end_time);
        if end <= start {
            return Err("end_time must be after start_time".into());
        }
        if let Some(capacity) = self.capacity {
            if capacity <= 0 {
                return Err("capacity must be positive".into());
            }
            if i64::from(capacity) < current.registered_count {
                return Err(format!(
                    "capacity cannot be below the {} registered attendees",
                    current.registered_count
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub library: Option<i64>,
    pub upcoming: Option<bool>,
    pub search: Option<String>,
    pub is_premium: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RegistrationFilter {
    pub status: Option<RegistrationStatus>,
}
