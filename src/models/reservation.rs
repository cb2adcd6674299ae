use super::text_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

text_enum!(ReservationStatus {
    Pending => "PENDING", "Pending";
    Approved => "APPROVED", "Approved";
    Rejected => "REJECTED", "Rejected";
    Cancelled => "CANCELLED", "Cancelled";
    Returned => "RETURNED", "Returned";
});

impl ReservationStatus {
    /// PENDING and APPROVED count against the user's reservation limit.
    pub const ACTIVE: [ReservationStatus; 2] = [Self::Pending, Self::Approved];

    pub fn can_transition(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Pending, Approved | Rejected | Cancelled) | (Approved, Returned | Cancelled)
        )
    }

    /// An approved reservation holds one copy of the book.
    pub fn holds_copy(&self) -> bool {
        *self == Self::Approved
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BookReservation {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub book_id: i64,
    pub book_title: String,
    pub library_id: i64,
    pub status: ReservationStatus,
    #[sqlx(default)]
    pub status_display: String,
    pub reserved_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[sqlx(default)]
    pub is_overdue: bool,
}

impl BookReservation {
    pub fn with_display(mut self, now: DateTime<Utc>) -> Self {
        self.is_overdue = is_overdue(self.status, self.due_date, now);
        self.status_display = if self.is_overdue {
            "Overdue".to_string()
        } else {
            self.status.display().to_string()
        };
        self
    }
}

pub fn is_overdue(
    status: ReservationStatus,
    due_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status.holds_copy() && due_date.map_or(false, |due| due < now)
}

#[derive(Debug, Deserialize)]
pub struct ReservationData {
    pub book_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectData {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    pub overdue: Option<bool>,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_transitions() {
        use ReservationStatus::*;
        assert!(Pending.can_transition(Approved));
        assert!(Pending.can_transition(Rejected));
        assert!(Pending.can_transition(Cancelled));
        assert!(Approved.can_transition(Returned));
        assert!(Approved.can_transition(Cancelled));

        assert!(!Pending.can_transition(Returned));
        assert!(!Approved.can_transition(Rejected));
        for terminal in [Rejected, Cancelled, Returned] {
            for to in [Pending, Approved, Rejected, Cancelled, Returned] {
                assert!(!terminal.can_transition(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn test_overdue() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        let future = Some(now + Duration::days(1));

        assert!(is_overdue(ReservationStatus::Approved, past, now));
        assert!(!is_overdue(ReservationStatus::Approved, future, now));
        assert!(!is_overdue(ReservationStatus::Returned, past, now));
        assert!(!is_overdue(ReservationStatus::Pending, None, now));
    }
}
