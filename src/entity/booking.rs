use super::{fetch_chunk, Entity, Scope};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        booking::{BookingData, BookingFilter, BookingRules, BookingStatus, BookingWindow, SeatBooking},
        Chunk, PageQuery,
    },
};
use chrono::Utc;
use serde_json::json;
use sqlx::{Postgres, Transaction};

const BOOKING_SELECT: &str = "SELECT bk.*, u.full_name AS user_name,
    s.library_id, l.name AS library_name, s.seat_number";

const BOOKING_FROM: &str = "FROM seat_bookings bk
    JOIN users u ON u.id = bk.user_id
    JOIN seats s ON s.id = bk.seat_id
    JOIN libraries l ON l.id = s.library_id";

/// Locks the seat row and reports whether a confirmed booking overlaps the
/// window. Every booking insert goes through this lock.
async fn lock_seat_if_free(
    tx: &mut Transaction<'_, Postgres>,
    seat_id: i64,
    window: &BookingWindow,
) -> ApiResult<bool> {
    sqlx::query("SELECT id FROM seats WHERE id = $1 FOR UPDATE")
        .bind(seat_id)
        .execute(&mut *tx)
        .await?;

    let (taken,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (
            SELECT 1 FROM seat_bookings
            WHERE seat_id = $1 AND status = 'CONFIRMED'
              AND start_time < $3 AND end_time > $2
        )",
    )
    .bind(seat_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_one(&mut *tx)
    .await?;

    Ok(!taken)
}

impl Entity {
    pub async fn booking_create(&self, user_id: i64, data: &BookingData) -> ApiResult<SeatBooking> {
        let library = self.library_get_active(data.library_id).await?;
        let limits = self.access_limits(user_id).await?;

        let window = BookingWindow::new(data.start_time, data.end_time);
        window
            .validate(&BookingRules {
                now: Utc::now(),
                opening_time: library.opening_time,
                closing_time: library.closing_time,
                max_hours: limits.max_booking_hours,
                max_days_ahead: self.settings.booking.max_days_ahead,
            })
            .map_err(ApiError::BadRequest)?;

        let mut tx = self.pool.begin().await?;

        // One booking attempt per user at a time.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        let (clash,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                SELECT 1 FROM seat_bookings
                WHERE user_id = $1 AND status = 'CONFIRMED'
                  AND start_time < $3 AND end_time > $2
            )",
        )
        .bind(user_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&mut tx)
        .await?;

        if clash {
            return Err(ApiError::conflict(
                "you already have a booking overlapping this time",
            ));
        }

        let seat_id = match data.seat_id {
            Some(seat_id) => {
                let seat: Option<(bool,)> = sqlx::query_as(
                    "SELECT is_active FROM seats WHERE id = $1 AND library_id = $2",
                )
                .bind(seat_id)
                .bind(library.id)
                .fetch_optional(&mut tx)
                .await?;

                match seat {
                    None => return Err(ApiError::not_found("seat not found in this library")),
                    Some((false,)) => return Err(ApiError::bad_request("seat is not in service")),
                    Some((true,)) => {}
                }

                if !lock_seat_if_free(&mut tx, seat_id, &window).await? {
                    return Err(ApiError::conflict("seat is already booked for this time"));
                }
                seat_id
            }
            None => {
                let candidates: Vec<(i64,)> = sqlx::query_as(
                    "SELECT s.id FROM seats s
                     WHERE s.library_id = $1 AND s.is_active
                       AND NOT EXISTS (
                           SELECT 1 FROM seat_bookings bk
                           WHERE bk.seat_id = s.id AND bk.status = 'CONFIRMED'
                             AND bk.start_time < $3 AND bk.end_time > $2
                       )
                     ORDER BY s.seat_number",
                )
                .bind(library.id)
                .bind(window.start)
                .bind(window.end)
                .fetch_all(&mut tx)
                .await?;

                let mut chosen = None;
                for (seat_id,) in candidates {
                    if lock_seat_if_free(&mut tx, seat_id, &window).await? {
                        chosen = Some(seat_id);
                        break;
                    }
                }
                chosen.ok_or_else(|| ApiError::conflict("no seats are free for this time"))?
            }
        };

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO seat_bookings (user_id, seat_id, start_time, end_time)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id)
        .bind(seat_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id, library_id = library.id, seat_id, booking_id = id, "seat booked");
        self.activity_log(
            Some(user_id),
            "booking.create",
            "booking",
            Some(id),
            json!({ "seat_id": seat_id, "start_time": window.start, "end_time": window.end }),
        )
        .await;

        self.booking_get(id).await
    }

    pub async fn booking_query(
        &self,
        scope: Scope,
        filter: &BookingFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<SeatBooking>> {
        self.booking_sweep().await?;

        let chunk: Chunk<SeatBooking> = fetch_chunk(
            &self.pool,
            BOOKING_SELECT,
            BOOKING_FROM,
            "bk.start_time DESC, bk.id DESC",
            page,
            |qb| {
                scope.push(qb, "bk.user_id", "s.library_id");
                if let Some(status) = filter.status {
                    qb.push(" AND bk.status = ").push_bind(status);
                }
                if let Some(library) = filter.library {
                    qb.push(" AND s.library_id = ").push_bind(library);
                }
            },
        )
        .await?;

        let now = Utc::now();
        Ok(Chunk {
            items: chunk.items.into_iter().map(|booking| booking.with_display(now)).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn booking_get(&self, id: i64) -> ApiResult<SeatBooking> {
        let sql = format!("{BOOKING_SELECT} {BOOKING_FROM} WHERE bk.id = $1");

        let booking = sqlx::query_as::<_, SeatBooking>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("booking not found"))?;

        Ok(booking.with_display(Utc::now()))
    }

    /// Only a confirmed booking that has not ended can be cancelled.
    pub async fn booking_cancel(&self, actor_id: i64, id: i64) -> ApiResult<SeatBooking> {
        let now = Utc::now();
        let booking = self.booking_get(id).await?;

        if !booking.status.can_transition(BookingStatus::Cancelled) {
            return Err(ApiError::bad_request(format!(
                "a {} booking cannot be cancelled",
                booking.status.display().to_lowercase()
            )));
        }
        if booking.end_time <= now {
            return Err(ApiError::bad_request("a booking that has ended cannot be cancelled"));
        }

        let updated = sqlx::query(
            "UPDATE seat_bookings SET status = 'CANCELLED'
             WHERE id = $1 AND status = 'CONFIRMED' AND end_time > now()",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(ApiError::conflict("booking changed while cancelling"));
        }

        tracing::info!(actor_id, booking_id = id, "booking cancelled");
        self.activity_log(Some(actor_id), "booking.cancel", "booking", Some(id), json!({}))
            .await;

        self.booking_get(id).await
    }

    /// Marks confirmed bookings that have ended as COMPLETED.
    pub async fn booking_sweep(&self) -> ApiResult<u64> {
        let completed = sqlx::query(
            "UPDATE seat_bookings SET status = 'COMPLETED'
             WHERE status = 'CONFIRMED' AND end_time <= now()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if completed > 0 {
            tracing::debug!(completed, "bookings completed");
        }
        Ok(completed)
    }
}
