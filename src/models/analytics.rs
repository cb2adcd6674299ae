use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

pub const DEFAULT_DAYS: i64 = 30;
pub const MAX_DAYS: i64 = 365;
pub const DEFAULT_LIMIT: i64 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    /// Restricts a super admin's view to one library. Ignored for admins,
    /// who only ever see their own.
    pub library: Option<i64>,
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

impl AnalyticsQuery {
    pub fn days(&self) -> i64 {
        self.days.unwrap_or(DEFAULT_DAYS).clamp(1, MAX_DAYS)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 100)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Overview {
    pub total_users: i64,
    pub active_users: i64,
    pub total_libraries: i64,
    pub total_books: i64,
    pub total_copies: i64,
    pub available_copies: i64,
    pub upcoming_events: i64,
    pub active_bookings: i64,
    pub pending_reservations: i64,
    pub approved_reservations: i64,
    pub overdue_reservations: i64,
    pub active_subscriptions: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct DailyCount {
    pub day: NaiveDate,
    pub bookings: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PopularBook {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub library_name: String,
    pub reservations: i64,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct EventOccupancy {
    pub event_id: i64,
    pub title: String,
    pub library_name: String,
    pub capacity: i32,
    pub registered: i64,
    pub attended: i64,
    #[sqlx(default)]
    pub occupancy_rate: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PlanStats {
    pub plan_id: i64,
    pub plan_name: String,
    pub active: i64,
    pub expired: i64,
    pub cancelled: i64,
    pub revenue_cents: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LibraryUtilization {
    pub library_id: i64,
    pub name: String,
    pub total_seats: i32,
    pub active_bookings: i64,
    pub bookings_last_30_days: i64,
    pub books: i64,
    pub upcoming_events: i64,
    #[sqlx(default)]
    pub occupancy_rate: f64,
}

/// One entry per day from `first` through `last`, taking counts from `rows`
/// and zero for days with no bookings.
pub fn zero_fill(first: NaiveDate, last: NaiveDate, rows: Vec<DailyCount>) -> Vec<DailyCount> {
    let mut by_day: HashMap<NaiveDate, DailyCount> =
        rows.into_iter().map(|row| (row.day, row)).collect();

    let mut out = Vec::new();
    let mut day = first;
    while day <= last {
        out.push(by_day.remove(&day).unwrap_or(DailyCount {
            day,
            bookings: 0,
            cancelled: 0,
        }));
        day += Duration::days(1);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, d).unwrap()
    }

    #[test]
    fn test_zero_fill() {
        let rows = vec![
            DailyCount { day: day(2), bookings: 4, cancelled: 1 },
            DailyCount { day: day(4), bookings: 2, cancelled: 0 },
        ];
        let filled = zero_fill(day(1), day(4), rows);
        let counts: Vec<_> = filled.iter().map(|row| row.bookings).collect();
        assert_eq!(counts, vec![0, 4, 0, 2]);
        assert_eq!(filled[1].cancelled, 1);
        assert_eq!(filled[0].day, day(1));
    }

    #[test]
    fn test_zero_fill_drops_rows_outside_range() {
        let rows = vec![DailyCount { day: day(9), bookings: 4, cancelled: 0 }];
        let filled = zero_fill(day(1), day(2), rows);
        assert_eq!(filled.len(), 2);
        assert!(filled.iter().all(|row| row.bookings == 0));
    }

    #[test]
    fn test_query_clamps() {
        let query = AnalyticsQuery {
            days: Some(10_000),
            limit: Some(0),
            ..AnalyticsQuery::default()
        };
        assert_eq!(query.days(), MAX_DAYS);
        assert_eq!(query.limit(), 1);
        assert_eq!(AnalyticsQuery::default().days(), DEFAULT_DAYS);
    }
}
