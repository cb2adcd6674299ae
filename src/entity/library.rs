use super::{fetch_chunk, like, Entity};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        library::{
            nearest, Library, LibraryData, LibraryFilter, LibraryUpdate, NearbyQuery, Seat,
            SeatQuery, DEFAULT_NEARBY_LIMIT,
        },
        non_blank, Chunk, PageQuery,
    },
};
use chrono::Utc;
use serde_json::json;
use sqlx::{Postgres, Transaction};

const LIBRARY_SELECT: &str = "SELECT l.*,
    (SELECT COUNT(*) FROM seat_bookings bk JOIN seats s ON s.id = bk.seat_id
      WHERE s.library_id = l.id AND bk.status = 'CONFIRMED'
        AND bk.start_time <= now() AND bk.end_time > now()) AS active_bookings";

/// Cancels CONFIRMED bookings of the library that have not started yet,
/// limited to seats numbered above `above_seat` when given.
async fn cancel_future_bookings(
    tx: &mut Transaction<'_, Postgres>,
    library_id: i64,
    above_seat: Option<i32>,
) -> ApiResult<u64> {
    let cancelled = sqlx::query(
        "UPDATE seat_bookings bk SET status = 'CANCELLED'
         FROM seats s
         WHERE s.id = bk.seat_id AND s.library_id = $1
           AND ($2::int IS NULL OR s.seat_number > $2)
           AND bk.status = 'CONFIRMED' AND bk.start_time > now()",
    )
    .bind(library_id)
    .bind(above_seat)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    Ok(cancelled)
}

impl Entity {
    pub async fn library_create(&self, actor_id: i64, data: &LibraryData) -> ApiResult<Library> {
        data.validate().map_err(ApiError::BadRequest)?;

        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO libraries
                (name, address, city, latitude, longitude, total_seats,
                 opening_time, closing_time, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
             RETURNING id",
        )
        .bind(data.name.trim())
        .bind(data.address.trim())
        .bind(data.city.trim())
        .bind(data.latitude)
        .bind(data.longitude)
        .bind(data.total_seats)
        .bind(data.opening_time)
        .bind(data.closing_time)
        .bind(actor_id)
        .fetch_one(&mut tx)
        .await?;

        sqlx::query(
            "INSERT INTO seats (library_id, seat_number)
             SELECT $1, n FROM generate_series(1, $2) AS n",
        )
        .bind(id)
        .bind(data.total_seats)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        tracing::info!(actor_id, library_id = id, seats = data.total_seats, "library created");
        self.activity_log(
            Some(actor_id),
            "library.create",
            "library",
            Some(id),
            json!({ "name": data.name }),
        )
        .await;

        self.library_get(id).await
    }

    pub async fn library_query(
        &self,
        filter: &LibraryFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<Library>> {
        let search = non_blank(filter.search.as_deref()).map(like);
        let city = non_blank(filter.city.as_deref()).map(str::to_string);

        let chunk: Chunk<Library> = fetch_chunk(
            &self.pool,
            LIBRARY_SELECT,
            "FROM libraries l",
            "l.name, l.id",
            page,
            |qb| {
                if let Some(search) = &search {
                    qb.push(" AND (l.name ILIKE ")
                        .push_bind(search.clone())
                        .push(" OR l.address ILIKE ")
                        .push_bind(search.clone())
                        .push(")");
                }
                if let Some(city) = &city {
                    qb.push(" AND LOWER(l.city) = LOWER(").push_bind(city.clone()).push(")");
                }
                if let Some(is_active) = filter.is_active {
                    qb.push(" AND l.is_active = ").push_bind(is_active);
                }
            },
        )
        .await?;

        Ok(Chunk {
            items: chunk.items.into_iter().map(Library::with_display).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn library_get(&self, id: i64) -> ApiResult<Library> {
        let sql = format!("{LIBRARY_SELECT} FROM libraries l WHERE l.id = $1");

        let library = sqlx::query_as::<_, Library>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("library not found"))?;

        Ok(library.with_display())
    }

    /// An active library, or 400 when it has been deactivated.
    pub async fn library_get_active(&self, id: i64) -> ApiResult<Library> {
        let library = self.library_get(id).await?;
        if !library.is_active {
            return Err(ApiError::bad_request("library is not active"));
        }
        Ok(library)
    }

    pub async fn library_update(
        &self,
        actor_id: i64,
        id: i64,
        update: &LibraryUpdate,
    ) -> ApiResult<Library> {
        let current = self.library_get(id).await?;
        update.validate(&current).map_err(ApiError::BadRequest)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE libraries SET
                name = COALESCE($2, name),
                address = COALESCE($3, address),
                city = COALESCE($4, city),
                latitude = COALESCE($5, latitude),
                longitude = COALESCE($6, longitude),
                total_seats = COALESCE($7, total_seats),
                opening_time = COALESCE($8, opening_time),
                closing_time = COALESCE($9, closing_time),
                is_active = COALESCE($10, is_active),
                updated_by = $11,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.address.as_deref())
        .bind(update.city.as_deref())
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(update.total_seats)
        .bind(update.opening_time)
        .bind(update.closing_time)
        .bind(update.is_active)
        .bind(actor_id)
        .execute(&mut tx)
        .await?;

        let mut cancelled = 0;
        if let Some(seats) = update.total_seats {
            // Seats above the new count are deactivated, not deleted, so
            // their booking history survives.
            sqlx::query(
                "INSERT INTO seats (library_id, seat_number)
                 SELECT $1, n FROM generate_series(1, $2) AS n
                 ON CONFLICT (library_id, seat_number) DO UPDATE SET is_active = TRUE",
            )
            .bind(id)
            .bind(seats)
            .execute(&mut tx)
            .await?;

            sqlx::query("UPDATE seats SET is_active = FALSE WHERE library_id = $1 AND seat_number > $2")
                .bind(id)
                .bind(seats)
                .execute(&mut tx)
                .await?;

            if seats < current.total_seats {
                cancelled += cancel_future_bookings(&mut tx, id, Some(seats)).await?;
            }
        }

        if current.is_active && update.is_active == Some(false) {
            cancelled += cancel_future_bookings(&mut tx, id, None).await?;
        }

        tx.commit().await?;

        if cancelled > 0 {
            tracing::warn!(actor_id, library_id = id, cancelled, "library updated, bookings cancelled");
        } else {
            tracing::info!(actor_id, library_id = id, "library updated");
        }
        self.activity_log(
            Some(actor_id),
            "library.update",
            "library",
            Some(id),
            json!({ "is_active": update.is_active, "cancelled_bookings": cancelled }),
        )
        .await;

        self.library_get(id).await
    }

    /// Libraries are deactivated rather than deleted; future bookings at the
    /// library are cancelled.
    pub async fn library_deactivate(&self, actor_id: i64, id: i64) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE libraries SET is_active = FALSE, updated_by = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(actor_id)
        .execute(&mut tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(ApiError::not_found("library not found"));
        }

        let cancelled = cancel_future_bookings(&mut tx, id, None).await?;

        tx.commit().await?;

        tracing::warn!(actor_id, library_id = id, cancelled, "library deactivated");
        self.activity_log(
            Some(actor_id),
            "library.deactivate",
            "library",
            Some(id),
            json!({ "cancelled_bookings": cancelled }),
        )
        .await;
        Ok(())
    }

    pub async fn library_nearby(&self, query: &NearbyQuery) -> ApiResult<Vec<Library>> {
        if !(-90.0..=90.0).contains(&query.latitude) || !(-180.0..=180.0).contains(&query.longitude) {
            return Err(ApiError::bad_request("coordinates out of range"));
        }

        let sql = format!(
            "{LIBRARY_SELECT} FROM libraries l
             WHERE l.is_active AND l.latitude IS NOT NULL AND l.longitude IS NOT NULL"
        );
        let libraries = sqlx::query_as::<_, Library>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let limit = query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT).clamp(1, 100);
        Ok(nearest(libraries, (query.latitude, query.longitude), limit)
            .into_iter()
            .map(Library::with_display)
            .collect())
    }

    /// Active seats of a library with availability for the window; without a
    /// window, availability is for the current instant.
    pub async fn seat_query(&self, library_id: i64, query: &SeatQuery) -> ApiResult<Vec<Seat>> {
        self.library_get(library_id).await?;

        let now = Utc::now();
        let start = query.start_time.unwrap_or(now);
        let end = query.end_time.unwrap_or(start);
        if end < start {
            return Err(ApiError::bad_request("end_time must not be before start_time"));
        }

        let seats = sqlx::query_as::<_, Seat>(
            "SELECT s.id, s.library_id, s.seat_number, s.is_active,
                NOT EXISTS (
                    SELECT 1 FROM seat_bookings bk
                    WHERE bk.seat_id = s.id AND bk.status = 'CONFIRMED'
                      AND bk.start_time < GREATEST($3, $2 + interval '1 second')
                      AND bk.end_time > $2
                ) AS is_available
             FROM seats s
             WHERE s.library_id = $1 AND s.is_active
             ORDER BY s.seat_number",
        )
        .bind(library_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(seats)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        entity::Entity,
        models::{
            book::{BookData, BookFilter},
            booking::{BookingData, BookingStatus},
            library::{LibraryData, LibraryFilter, LibraryUpdate, SeatQuery},
            user::UserCreateData,
            PageQuery,
        },
        settings::Settings,
    };
    use chrono::{Duration, NaiveTime, Utc};
    use std::env;

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_library_seats_follow_total() {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let actor = app
            .user_create(&UserCreateData {
                email: format!("root+{}@example.com", crate::auth::session_token()),
                password: "root-password".into(),
                full_name: "Root".into(),
            })
            .await
            .unwrap();

        let library = app
            .library_create(
                actor.id,
                &LibraryData {
                    name: "Imizu".into(),
                    address: String::new(),
                    city: "Imizu".into(),
                    latitude: Some(36.7077262),
                    longitude: Some(137.0958753),
                    total_seats: 3,
                    opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    closing_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let seats = app
            .seat_query(library.id, &SeatQuery { start_time: None, end_time: None })
            .await
            .unwrap();
        assert_eq!(seats.len(), 3);
        assert!(seats.iter().all(|seat| seat.is_available));

        let updated = app
            .library_update(
                actor.id,
                library.id,
                &LibraryUpdate {
                    total_seats: Some(2),
                    ..LibraryUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.total_seats, 2);

        let seats = app
            .seat_query(library.id, &SeatQuery { start_time: None, end_time: None })
            .await
            .unwrap();
        assert_eq!(seats.len(), 2);

        let rejected = app
            .library_update(
                actor.id,
                library.id,
                &LibraryUpdate {
                    opening_time: Some(NaiveTime::from_hms_opt(23, 0, 0).unwrap()),
                    ..LibraryUpdate::default()
                },
            )
            .await;
        assert!(rejected.is_err());
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_shrink_and_deactivate_cancel_future_bookings() {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let mut users = Vec::new();
        for name in ["owner", "front", "back"] {
            users.push(
                app.user_create(&UserCreateData {
                    email: format!("{name}+{}@example.com", crate::auth::session_token()),
                    password: "library-pass".into(),
                    full_name: name.into(),
                })
                .await
                .unwrap(),
            );
        }

        let library = app
            .library_create(
                users[0].id,
                &LibraryData {
                    name: "Closing Soon".into(),
                    address: String::new(),
                    city: String::new(),
                    latitude: None,
                    longitude: None,
                    total_seats: 2,
                    opening_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                    closing_time: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let book = app
            .book_create(
                users[0].id,
                BookData {
                    library_id: library.id,
                    title: "Shelved".into(),
                    author: String::new(),
                    isbn: None,
                    category: String::new(),
                    description: String::new(),
                    total_copies: 1,
                    is_premium: false,
                },
            )
            .await
            .unwrap();

        let day = (Utc::now() + Duration::days(1)).date_naive();
        let start = day.and_hms_opt(10, 0, 0).unwrap().and_utc();
        let data = BookingData {
            library_id: library.id,
            seat_id: None,
            start_time: start,
            end_time: start + Duration::hours(2),
        };
        let front = app.booking_create(users[1].id, &data).await.unwrap();
        let back = app.booking_create(users[2].id, &data).await.unwrap();
        assert_eq!(back.seat_number, 2);

        app.library_update(
            users[0].id,
            library.id,
            &LibraryUpdate {
                total_seats: Some(1),
                ..LibraryUpdate::default()
            },
        )
        .await
        .unwrap();

        let back = app.booking_get(back.id).await.unwrap();
        assert_eq!(back.status, BookingStatus::Cancelled);
        let front_kept = app.booking_get(front.id).await.unwrap();
        assert_eq!(front_kept.status, BookingStatus::Confirmed);

        let closed = app
            .library_update(
                users[0].id,
                library.id,
                &LibraryUpdate {
                    is_active: Some(false),
                    ..LibraryUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!closed.is_active);
        let front = app.booking_get(front.id).await.unwrap();
        assert_eq!(front.status, BookingStatus::Cancelled);

        let page = PageQuery::default();
        let visible = app
            .library_query(
                &LibraryFilter {
                    is_active: Some(true),
                    ..LibraryFilter::default()
                },
                &page,
            )
            .await
            .unwrap();
        assert!(visible.items.iter().all(|listed| listed.id != library.id));

        let books = app
            .book_query(
                &BookFilter {
                    library: Some(library.id),
                    library_active: Some(true),
                    ..BookFilter::default()
                },
                &page,
            )
            .await
            .unwrap();
        assert!(books.items.iter().all(|listed| listed.id != book.id));
    }
}
