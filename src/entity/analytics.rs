//! Aggregates for the admin dashboards. Every method takes the library the
//! caller is confined to; `None` aggregates over all libraries. User and
//! subscription figures are always global.

use super::Entity;
use crate::{
    error::ApiResult,
    models::{
        analytics::{
            zero_fill, AnalyticsQuery, DailyCount, EventOccupancy, LibraryUtilization, Overview,
            PlanStats, PopularBook,
        },
        rate,
    },
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Midnight UTC starting `day`.
fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::default()))
}

/// The first day of a window of `days` days ending today.
fn window_start(now: DateTime<Utc>, days: i64) -> NaiveDate {
    now.date_naive() - Duration::days(days - 1)
}

impl Entity {
    pub async fn analytics_overview(&self, library: Option<i64>) -> ApiResult<Overview> {
        self.subscription_sweep().await?;

        let overview = sqlx::query_as::<_, Overview>(
            "SELECT
                (SELECT COUNT(*) FROM users) AS total_users,
                (SELECT COUNT(*) FROM users WHERE is_active) AS active_users,
                (SELECT COUNT(*) FROM libraries
                  WHERE is_active AND ($1::bigint IS NULL OR id = $1)) AS total_libraries,
                (SELECT COUNT(*) FROM books
                  WHERE $1::bigint IS NULL OR library_id = $1) AS total_books,
                (SELECT COALESCE(SUM(total_copies), 0)::bigint FROM books
                  WHERE $1::bigint IS NULL OR library_id = $1) AS total_copies,
                (SELECT COALESCE(SUM(available_copies), 0)::bigint FROM books
                  WHERE $1::bigint IS NULL OR library_id = $1) AS available_copies,
                (SELECT COUNT(*) FROM events
                  WHERE start_time > now() AND NOT is_cancelled
                    AND ($1::bigint IS NULL OR library_id = $1)) AS upcoming_events,
                (SELECT COUNT(*) FROM seat_bookings bk JOIN seats s ON s.id = bk.seat_id
                  WHERE bk.status = 'CONFIRMED' AND bk.start_time <= now() AND bk.end_time > now()
                    AND ($1::bigint IS NULL OR s.library_id = $1)) AS active_bookings,
                (SELECT COUNT(*) FROM book_reservations r JOIN books b ON b.id = r.book_id
                  WHERE r.status = 'PENDING'
                    AND ($1::bigint IS NULL OR b.library_id = $1)) AS pending_reservations,
                (SELECT COUNT(*) FROM book_reservations r JOIN books b ON b.id = r.book_id
                  WHERE r.status = 'APPROVED'
                    AND ($1::bigint IS NULL OR b.library_id = $1)) AS approved_reservations,
                (SELECT COUNT(*) FROM book_reservations r JOIN books b ON b.id = r.book_id
                  WHERE r.status = 'APPROVED' AND r.due_date < now()
                    AND ($1::bigint IS NULL OR b.library_id = $1)) AS overdue_reservations,
                (SELECT COUNT(*) FROM user_subscriptions WHERE status = 'ACTIVE') AS active_subscriptions,
                (SELECT COALESCE(SUM(amount_cents), 0)::bigint FROM user_subscriptions) AS revenue_cents",
        )
        .bind(library)
        .fetch_one(&self.pool)
        .await?;

        Ok(overview)
    }

    /// Bookings per UTC day over the last `days` days, including empty days.
    pub async fn analytics_bookings(
        &self,
        library: Option<i64>,
        query: &AnalyticsQuery,
    ) -> ApiResult<Vec<DailyCount>> {
        let now = Utc::now();
        let first = window_start(now, query.days());
        let last = now.date_naive();

        let rows = sqlx::query_as::<_, DailyCount>(
            "SELECT (bk.start_time AT TIME ZONE 'UTC')::date AS day,
                COUNT(*) AS bookings,
                COUNT(*) FILTER (WHERE bk.status = 'CANCELLED') AS cancelled
             FROM seat_bookings bk JOIN seats s ON s.id = bk.seat_id
             WHERE bk.start_time >= $2 AND bk.start_time < $3
               AND ($1::bigint IS NULL OR s.library_id = $1)
             GROUP BY 1
             ORDER BY 1",
        )
        .bind(library)
        .bind(day_start(first))
        .bind(day_start(last) + Duration::days(1))
        .fetch_all(&self.pool)
        .await?;

        Ok(zero_fill(first, last, rows))
    }

    /// Most reserved books within the window.
    pub async fn analytics_popular_books(
        &self,
        library: Option<i64>,
        query: &AnalyticsQuery,
    ) -> ApiResult<Vec<PopularBook>> {
        let since = day_start(window_start(Utc::now(), query.days()));

        let books = sqlx::query_as::<_, PopularBook>(
            "SELECT b.id AS book_id, b.title, b.author, l.name AS library_name,
                COUNT(r.id) AS reservations,
                (SELECT AVG(rv.rating)::float8 FROM reviews rv WHERE rv.book_id = b.id) AS average_rating
             FROM books b
             JOIN libraries l ON l.id = b.library_id
             JOIN book_reservations r ON r.book_id = b.id AND r.reserved_at >= $2
             WHERE $1::bigint IS NULL OR b.library_id = $1
             GROUP BY b.id, l.name
             ORDER BY reservations DESC, b.title
             LIMIT $3",
        )
        .bind(library)
        .bind(since)
        .bind(query.limit())
        .fetch_all(&self.pool)
        .await?;

        Ok(books)
    }

    /// Registrations against capacity for events starting within the window
    /// or later, latest first.
    pub async fn analytics_events(
        &self,
        library: Option<i64>,
        query: &AnalyticsQuery,
    ) -> ApiResult<Vec<EventOccupancy>> {
        let since = day_start(window_start(Utc::now(), query.days()));

        let events = sqlx::query_as::<_, EventOccupancy>(
            "SELECT e.id AS event_id, e.title, l.name AS library_name, e.capacity,
                COUNT(er.id) FILTER (WHERE er.status IN ('REGISTERED', 'ATTENDED')) AS registered,
                COUNT(er.id) FILTER (WHERE er.status = 'ATTENDED') AS attended
             FROM events e
             JOIN libraries l ON l.id = e.library_id
             LEFT JOIN event_registrations er ON er.event_id = e.id
             WHERE NOT e.is_cancelled AND e.start_time >= $2
               AND ($1::bigint IS NULL OR e.library_id = $1)
             GROUP BY e.id, l.name
             ORDER BY e.start_time DESC
             LIMIT $3",
        )
        .bind(library)
        .bind(since)
        .bind(query.limit())
        .fetch_all(&self.pool)
        .await?;

        Ok(events
            .into_iter()
            .map(|mut event| {
                event.occupancy_rate = rate(event.registered, i64::from(event.capacity));
                event
            })
            .collect())
    }

    pub async fn analytics_subscriptions(&self) -> ApiResult<Vec<PlanStats>> {
        self.subscription_sweep().await?;

        let plans = sqlx::query_as::<_, PlanStats>(
            "SELECT p.id AS plan_id, p.name AS plan_name,
                COUNT(s.id) FILTER (WHERE s.status = 'ACTIVE') AS active,
                COUNT(s.id) FILTER (WHERE s.status = 'EXPIRED') AS expired,
                COUNT(s.id) FILTER (WHERE s.status = 'CANCELLED') AS cancelled,
                COALESCE(SUM(s.amount_cents), 0)::bigint AS revenue_cents
             FROM subscription_plans p
             LEFT JOIN user_subscriptions s ON s.plan_id = p.id
             GROUP BY p.id
             ORDER BY p.price_cents, p.id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn analytics_libraries(&self, library: Option<i64>) -> ApiResult<Vec<LibraryUtilization>> {
        let libraries = sqlx::query_as::<_, LibraryUtilization>(
            "SELECT l.id AS library_id, l.name, l.total_seats,
                (SELECT COUNT(*) FROM seat_bookings bk JOIN seats s ON s.id = bk.seat_id
                  WHERE s.library_id = l.id AND bk.status = 'CONFIRMED'
                    AND bk.start_time <= now() AND bk.end_time > now()) AS active_bookings,
                (SELECT COUNT(*) FROM seat_bookings bk JOIN seats s ON s.id = bk.seat_id
                  WHERE s.library_id = l.id AND bk.status <> 'CANCELLED'
                    AND bk.start_time >= now() - interval '30 days') AS bookings_last_30_days,
                (SELECT COUNT(*) FROM books b WHERE b.library_id = l.id) AS books,
                (SELECT COUNT(*) FROM events e
                  WHERE e.library_id = l.id AND e.start_time > now() AND NOT e.is_cancelled) AS upcoming_events
             FROM libraries l
             WHERE l.is_active AND ($1::bigint IS NULL OR l.id = $1)
             ORDER BY l.name, l.id",
        )
        .bind(library)
        .fetch_all(&self.pool)
        .await?;

        Ok(libraries
            .into_iter()
            .map(|mut library| {
                library.occupancy_rate =
                    rate(library.active_bookings, i64::from(library.total_seats));
                library
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_window_start() {
        let now = Utc.with_ymd_and_hms(2030, 3, 10, 15, 30, 0).unwrap();
        assert_eq!(window_start(now, 1), NaiveDate::from_ymd_opt(2030, 3, 10).unwrap());
        assert_eq!(window_start(now, 10), NaiveDate::from_ymd_opt(2030, 3, 1).unwrap());
    }

    #[test]
    fn test_day_start_is_midnight_utc() {
        let day = NaiveDate::from_ymd_opt(2030, 3, 10).unwrap();
        assert_eq!(day_start(day), Utc.with_ymd_and_hms(2030, 3, 10, 0, 0, 0).unwrap());
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_bookings_series_is_zero_filled() {
        let mut settings = crate::settings::Settings::default();
        settings.database.url = std::env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let query = AnalyticsQuery {
            days: Some(7),
            ..AnalyticsQuery::default()
        };
        let series = app.analytics_bookings(None, &query).await.unwrap();
        assert_eq!(series.len(), 7);

        let overview = app.analytics_overview(None).await.unwrap();
        assert!(overview.available_copies <= overview.total_copies);
    }
}
