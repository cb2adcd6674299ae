use super::{fetch_chunk, Entity, Scope};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        reservation::{BookReservation, ReservationFilter, ReservationStatus},
        Chunk, PageQuery,
    },
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{Postgres, Transaction};

const RESERVATION_SELECT: &str = "SELECT r.*, u.full_name AS user_name,
    b.title AS book_title, b.library_id";

const RESERVATION_FROM: &str = "FROM book_reservations r
    JOIN users u ON u.id = r.user_id
    JOIN books b ON b.id = r.book_id";

/// The locked columns of a reservation a transition needs.
struct Locked {
    user_id: i64,
    book_id: i64,
    status: ReservationStatus,
}

async fn lock(tx: &mut Transaction<'_, Postgres>, id: i64) -> ApiResult<Locked> {
    let (user_id, book_id, status): (i64, i64, ReservationStatus) = sqlx::query_as(
        "SELECT user_id, book_id, status FROM book_reservations WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("reservation not found"))?;

    Ok(Locked {
        user_id,
        book_id,
        status,
    })
}

fn check_transition(from: ReservationStatus, to: ReservationStatus) -> ApiResult<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "a {} reservation cannot become {}",
            from.display().to_lowercase(),
            to.display().to_lowercase()
        )))
    }
}

async fn release_copy(tx: &mut Transaction<'_, Postgres>, book_id: i64) -> ApiResult<()> {
    sqlx::query(
        "UPDATE books SET available_copies = LEAST(total_copies, available_copies + 1)
         WHERE id = $1",
    )
    .bind(book_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

impl Entity {
    pub async fn reservation_create(&self, user_id: i64, book_id: i64) -> ApiResult<BookReservation> {
        let book = self.book_get(book_id).await?;
        let limits = self.access_limits(user_id).await?;

        if book.is_premium && !limits.premium_access {
            return Err(ApiError::forbidden(
                "this book requires a subscription with premium access",
            ));
        }
        if book.available_copies <= 0 {
            return Err(ApiError::bad_request("no copies of this book are available"));
        }

        let mut tx = self.pool.begin().await?;

        // Serializes concurrent reservations of the same user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .execute(&mut tx)
            .await?;

        let active_states: Vec<&str> = ReservationStatus::ACTIVE
            .iter()
            .map(ReservationStatus::as_str)
            .collect();
        let (active,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM book_reservations WHERE user_id = $1 AND status = ANY($2)",
        )
        .bind(user_id)
        .bind(active_states)
        .fetch_one(&mut tx)
        .await?;

        if active >= i64::from(limits.max_active_reservations) {
            return Err(ApiError::bad_request(format!(
                "you can have at most {} active reservations",
                limits.max_active_reservations
            )));
        }

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO book_reservations (user_id, book_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&mut tx)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => {
                ApiError::conflict("you already have an active reservation for this book")
            }
            other => other,
        })?;

        tx.commit().await?;

        tracing::info!(user_id, book_id, reservation_id = id, "book reserved");
        self.activity_log(
            Some(user_id),
            "reservation.create",
            "reservation",
            Some(id),
            json!({ "book_id": book_id }),
        )
        .await;

        self.reservation_get(id).await
    }

    pub async fn reservation_query(
        &self,
        scope: Scope,
        filter: &ReservationFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<BookReservation>> {
        let chunk: Chunk<BookReservation> = fetch_chunk(
            &self.pool,
            RESERVATION_SELECT,
            RESERVATION_FROM,
            "r.reserved_at DESC, r.id DESC",
            page,
            |qb| {
                scope.push(qb, "r.user_id", "b.library_id");
                if let Some(status) = filter.status {
                    qb.push(" AND r.status = ").push_bind(status);
                }
                match filter.overdue {
                    Some(true) => {
                        qb.push(" AND r.status = 'APPROVED' AND r.due_date < now()");
                    }
                    Some(false) => {
                        qb.push(" AND NOT (r.status = 'APPROVED' AND r.due_date < now())");
                    }
                    None => {}
                }
            },
        )
        .await?;

        let now = Utc::now();
        Ok(Chunk {
            items: chunk
                .items
                .into_iter()
                .map(|reservation| reservation.with_display(now))
                .collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn reservation_get(&self, id: i64) -> ApiResult<BookReservation> {
        let sql = format!("{RESERVATION_SELECT} {RESERVATION_FROM} WHERE r.id = $1");

        let reservation = sqlx::query_as::<_, BookReservation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("reservation not found"))?;

        Ok(reservation.with_display(Utc::now()))
    }

    /// Cancelled by its owner. An approved reservation gives its copy back.
    pub async fn reservation_cancel(&self, user_id: i64, id: i64) -> ApiResult<BookReservation> {
        let mut tx = self.pool.begin().await?;
        let locked = lock(&mut tx, id).await?;

        if locked.user_id != user_id {
            return Err(ApiError::forbidden("you can only cancel your own reservations"));
        }
        check_transition(locked.status, ReservationStatus::Cancelled)?;

        sqlx::query("UPDATE book_reservations SET status = 'CANCELLED' WHERE id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;

        if locked.status.holds_copy() {
            release_copy(&mut tx, locked.book_id).await?;
        }

        tx.commit().await?;

        tracing::info!(user_id, reservation_id = id, "reservation cancelled");
        self.activity_log(Some(user_id), "reservation.cancel", "reservation", Some(id), json!({}))
            .await;

        self.reservation_get(id).await
    }

    /// Takes one copy off the shelf; 409 when none is left.
    pub async fn reservation_approve(&self, actor_id: i64, id: i64) -> ApiResult<BookReservation> {
        let mut tx = self.pool.begin().await?;
        let locked = lock(&mut tx, id).await?;
        check_transition(locked.status, ReservationStatus::Approved)?;

        let taken = sqlx::query(
            "UPDATE books SET available_copies = available_copies - 1
             WHERE id = $1 AND available_copies > 0",
        )
        .bind(locked.book_id)
        .execute(&mut tx)
        .await?
        .rows_affected();

        if taken == 0 {
            return Err(ApiError::conflict("no copies of this book are available"));
        }

        let due_date = Utc::now() + Duration::days(self.settings.reservation.loan_days);
        sqlx::query(
            "UPDATE book_reservations SET status = 'APPROVED', approved_at = now(), due_date = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(due_date)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::info!(actor_id, reservation_id = id, "reservation approved");
        self.activity_log(
            Some(actor_id),
            "reservation.approve",
            "reservation",
            Some(id),
            json!({ "due_date": due_date }),
        )
        .await;

        self.reservation_get(id).await
    }

    pub async fn reservation_reject(
        &self,
        actor_id: i64,
        id: i64,
        reason: Option<&str>,
    ) -> ApiResult<BookReservation> {
        let mut tx = self.pool.begin().await?;
        let locked = lock(&mut tx, id).await?;
        check_transition(locked.status, ReservationStatus::Rejected)?;

        let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
        sqlx::query(
            "UPDATE book_reservations SET status = 'REJECTED', rejection_reason = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::info!(actor_id, reservation_id = id, "reservation rejected");
        self.activity_log(
            Some(actor_id),
            "reservation.reject",
            "reservation",
            Some(id),
            json!({ "reason": reason }),
        )
        .await;

        self.reservation_get(id).await
    }

    /// Puts the copy back on the shelf.
    pub async fn reservation_return(&self, actor_id: i64, id: i64) -> ApiResult<BookReservation> {
        let mut tx = self.pool.begin().await?;
        let locked = lock(&mut tx, id).await?;
        check_transition(locked.status, ReservationStatus::Returned)?;

        sqlx::query(
            "UPDATE book_reservations SET status = 'RETURNED', returned_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&mut tx)
        .await?;

        release_copy(&mut tx, locked.book_id).await?;
        tx.commit().await?;

        tracing::info!(actor_id, reservation_id = id, "book returned");
        self.activity_log(Some(actor_id), "reservation.return", "reservation", Some(id), json!({}))
            .await;

        self.reservation_get(id).await
    }
}
