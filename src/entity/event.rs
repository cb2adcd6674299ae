use super::{fetch_chunk, like, Entity};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        event::{
            check_attendance, Event, EventData, EventFilter, EventRegistration, EventUpdate,
            RegistrationFilter, RegistrationStatus,
        },
        non_blank, Chunk, PageQuery,
    },
};
use chrono::{DateTime, Utc};
use serde_json::json;

const EVENT_FROM: &str = "FROM events e JOIN libraries l ON l.id = e.library_id";

const REGISTRATION_SELECT: &str = "SELECT er.*, e.title AS event_title,
    e.start_time AS event_start_time, u.full_name AS user_name, u.email AS user_email";

const REGISTRATION_FROM: &str = "FROM event_registrations er
    JOIN events e ON e.id = er.event_id
    JOIN users u ON u.id = er.user_id";

/// `is_registered` is computed for `viewer`.
fn event_select(viewer: i64) -> String {
    format!(
        "SELECT e.*, l.name AS library_name,
            (SELECT COUNT(*) FROM event_registrations er
              WHERE er.event_id = e.id AND er.status IN ('REGISTERED', 'ATTENDED')) AS registered_count,
            EXISTS (SELECT 1 FROM event_registrations er
              WHERE er.event_id = e.id AND er.user_id = {viewer} AND er.status = 'REGISTERED') AS is_registered"
    )
}

/// Whose registrations to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationScope {
    Event(i64),
    User(i64),
}

impl Entity {
    pub async fn event_create(&self, actor_id: i64, data: &EventData) -> ApiResult<Event> {
        data.validate(Utc::now()).map_err(ApiError::BadRequest)?;
        self.library_get_active(data.library_id).await?;

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO events
                (library_id, title, description, start_time, end_time, capacity,
                 is_premium, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
             RETURNING id",
        )
        .bind(data.library_id)
        .bind(data.title.trim())
        .bind(&data.description)
        .bind(data.start_time)
        .bind(data.end_time)
        .bind(data.capacity)
        .bind(data.is_premium)
        .bind(actor_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(actor_id, event_id = id, library_id = data.library_id, "event created");
        self.activity_log(
            Some(actor_id),
            "event.create",
            "event",
            Some(id),
            json!({ "title": data.title, "capacity": data.capacity }),
        )
        .await;

        self.event_get(actor_id, id).await
    }

    pub async fn event_query(
        &self,
        viewer: i64,
        filter: &EventFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<Event>> {
        let search = non_blank(filter.search.as_deref()).map(like);

        let chunk: Chunk<Event> = fetch_chunk(
            &self.pool,
            &event_select(viewer),
            EVENT_FROM,
            "e.start_time, e.id",
            page,
            |qb| {
                if let Some(library) = filter.library {
                    qb.push(" AND e.library_id = ").push_bind(library);
                }
                if filter.upcoming == Some(true) {
                    qb.push(" AND e.start_time > now() AND NOT e.is_cancelled");
                }
                if let Some(search) = &search {
                    qb.push(" AND (e.title ILIKE ")
                        .push_bind(search.clone())
                        .push(" OR e.description ILIKE ")
                        .push_bind(search.clone())
                        .push(")");
                }
                if let Some(is_premium) = filter.is_premium {
                    qb.push(" AND e.is_premium = ").push_bind(is_premium);
                }
            },
        )
        .await?;

        let now = Utc::now();
        Ok(Chunk {
            items: chunk.items.into_iter().map(|event| event.with_display(now)).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn event_get(&self, viewer: i64, id: i64) -> ApiResult<Event> {
        let sql = format!("{} {EVENT_FROM} WHERE e.id = $1", event_select(viewer));

        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("event not found"))?;

        Ok(event.with_display(Utc::now()))
    }

    pub async fn event_update(&self, actor_id: i64, id: i64, update: &EventUpdate) -> ApiResult<Event> {
        let current = self.event_get(actor_id, id).await?;
        if current.is_cancelled {
            return Err(ApiError::bad_request("a cancelled event cannot be edited"));
        }
        update.validate(&current, Utc::now()).map_err(ApiError::BadRequest)?;

        sqlx::query(
            "UPDATE events SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                start_time = COALESCE($4, start_time),
                end_time = COALESCE($5, end_time),
                capacity = COALESCE($6, capacity),
                is_premium = COALESCE($7, is_premium),
                updated_by = $8,
                updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.title.as_deref().map(str::trim))
        .bind(update.description.as_deref())
        .bind(update.start_time)
        .bind(update.end_time)
        .bind(update.capacity)
        .bind(update.is_premium)
        .bind(actor_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(actor_id, event_id = id, "event updated");
        self.activity_log(Some(actor_id), "event.update", "event", Some(id), json!({}))
            .await;

        self.event_get(actor_id, id).await
    }

    pub async fn event_cancel(&self, actor_id: i64, id: i64) -> ApiResult<Event> {
        let event = self.event_get(actor_id, id).await?;
        if event.is_cancelled {
            return Err(ApiError::bad_request("event is already cancelled"));
        }
        if event.end_time <= Utc::now() {
            return Err(ApiError::bad_request("a finished event cannot be cancelled"));
        }

        sqlx::query(
            "UPDATE events SET is_cancelled = TRUE, updated_by = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(actor_id)
        .execute(&self.pool)
        .await?;

        tracing::warn!(actor_id, event_id = id, registered = event.registered_count, "event cancelled");
        self.activity_log(
            Some(actor_id),
            "event.cancel",
            "event",
            Some(id),
            json!({ "registered": event.registered_count }),
        )
        .await;

        self.event_get(actor_id, id).await
    }

    pub async fn event_delete(&self, actor_id: i64, id: i64) -> ApiResult<()> {
        let deleted = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(ApiError::not_found("event not found"));
        }

        tracing::warn!(actor_id, event_id = id, "event deleted");
        self.activity_log(Some(actor_id), "event.delete", "event", Some(id), json!({}))
            .await;
        Ok(())
    }

    /// Registers `user_id` with the event row locked, so the capacity check
    /// and the insert see the same count.
    pub async fn event_register(&self, user_id: i64, event_id: i64) -> ApiResult<EventRegistration> {
        let limits = self.access_limits(user_id).await?;
        let mut tx = self.pool.begin().await?;

        let (start_time, is_cancelled, is_premium, capacity): (DateTime<Utc>, bool, bool, i32) =
            sqlx::query_as(
                "SELECT start_time, is_cancelled, is_premium, capacity FROM events
                 WHERE id = $1 FOR UPDATE",
            )
            .bind(event_id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or_else(|| ApiError::not_found("event not found"))?;

        if is_cancelled {
            return Err(ApiError::bad_request("this event has been cancelled"));
        }
        if start_time <= Utc::now() {
            return Err(ApiError::bad_request("this event has already started"));
        }
        if is_premium && !limits.premium_access {
            return Err(ApiError::forbidden(
                "this event requires a subscription with premium access",
            ));
        }

        let existing: Option<(i64, RegistrationStatus)> = sqlx::query_as(
            "SELECT id, status FROM event_registrations WHERE event_id = $1 AND user_id = $2",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&mut tx)
        .await?;

        if matches!(existing, Some((_, status)) if status != RegistrationStatus::Cancelled) {
            return Err(ApiError::conflict("you are already registered for this event"));
        }

        let (registered,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM event_registrations
             WHERE event_id = $1 AND status IN ('REGISTERED', 'ATTENDED')",
        )
        .bind(event_id)
        .fetch_one(&mut tx)
        .await?;

        if registered >= i64::from(capacity) {
            return Err(ApiError::conflict("this event is full"));
        }

        let id = match existing {
            Some((id, _)) => {
                sqlx::query(
                    "UPDATE event_registrations SET status = 'REGISTERED', registered_at = now()
                     WHERE id = $1",
                )
                .bind(id)
                .execute(&mut tx)
                .await?;
                id
            }
            None => {
                let (id,): (i64,) = sqlx::query_as(
                    "INSERT INTO event_registrations (event_id, user_id) VALUES ($1, $2) RETURNING id",
                )
                .bind(event_id)
                .bind(user_id)
                .fetch_one(&mut tx)
                .await?;
                id
            }
        };

        tx.commit().await?;

        tracing::info!(user_id, event_id, registration_id = id, "registered for event");
        self.activity_log(
            Some(user_id),
            "event.register",
            "event",
            Some(event_id),
            json!({ "registration_id": id }),
        )
        .await;

        self.registration_get(id).await
    }

    pub async fn event_unregister(&self, user_id: i64, event_id: i64) -> ApiResult<EventRegistration> {
        let event = self.event_get(user_id, event_id).await?;
        if event.start_time <= Utc::now() {
            return Err(ApiError::bad_request("this event has already started"));
        }

        let cancelled: Option<(i64,)> = sqlx::query_as(
            "UPDATE event_registrations SET status = 'CANCELLED'
             WHERE event_id = $1 AND user_id = $2 AND status = 'REGISTERED'
             RETURNING id",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (id,) = cancelled
            .ok_or_else(|| ApiError::not_found("you are not registered for this event"))?;

        tracing::info!(user_id, event_id, "unregistered from event");
        self.activity_log(Some(user_id), "event.unregister", "event", Some(event_id), json!({}))
            .await;

        self.registration_get(id).await
    }

    /// Marks a REGISTERED attendee of `event_id` as ATTENDED.
    pub async fn registration_attend(
        &self,
        actor_id: i64,
        event_id: i64,
        id: i64,
    ) -> ApiResult<EventRegistration> {
        let mut tx = self.pool.begin().await?;

        let (status, start_time, is_cancelled): (RegistrationStatus, DateTime<Utc>, bool) =
            sqlx::query_as(
                "SELECT er.status, e.start_time, e.is_cancelled
                 FROM event_registrations er JOIN events e ON e.id = er.event_id
                 WHERE er.id = $1 AND er.event_id = $2
                 FOR UPDATE OF er",
            )
            .bind(id)
            .bind(event_id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or_else(|| ApiError::not_found("registration not found"))?;

        check_attendance(status, start_time, is_cancelled, Utc::now())
            .map_err(ApiError::BadRequest)?;

        sqlx::query("UPDATE event_registrations SET status = 'ATTENDED' WHERE id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        tracing::info!(actor_id, event_id, registration_id = id, "attendance recorded");
        self.activity_log(
            Some(actor_id),
            "event.attend",
            "event",
            Some(event_id),
            json!({ "registration_id": id }),
        )
        .await;

        self.registration_get(id).await
    }

    pub async fn registration_query(
        &self,
        scope: RegistrationScope,
        filter: &RegistrationFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<EventRegistration>> {
        let chunk: Chunk<EventRegistration> = fetch_chunk(
            &self.pool,
            REGISTRATION_SELECT,
            REGISTRATION_FROM,
            "er.registered_at DESC, er.id DESC",
            page,
            |qb| {
                match scope {
                    RegistrationScope::Event(id) => qb.push(" AND er.event_id = ").push_bind(id),
                    RegistrationScope::User(id) => qb.push(" AND er.user_id = ").push_bind(id),
                };
                if let Some(status) = filter.status {
                    qb.push(" AND er.status = ").push_bind(status);
                }
            },
        )
        .await?;

        Ok(Chunk {
            items: chunk.items.into_iter().map(EventRegistration::with_display).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn registration_get(&self, id: i64) -> ApiResult<EventRegistration> {
        let sql = format!("{REGISTRATION_SELECT} {REGISTRATION_FROM} WHERE er.id = $1");

        let registration = sqlx::query_as::<_, EventRegistration>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("registration not found"))?;

        Ok(registration.with_display())
    }
}

#[cfg(test)]
mod test {
    use super::{event_select, RegistrationScope};
    use crate::{
        entity::Entity,
        error::ApiError,
        models::{
            event::{EventData, RegistrationFilter, RegistrationStatus},
            library::LibraryData,
            user::UserCreateData,
            PageQuery,
        },
        settings::Settings,
    };
    use chrono::{Duration, NaiveTime, Utc};
    use std::env;

    #[test]
    fn test_event_select_binds_viewer() {
        let sql = event_select(42);
        assert!(sql.contains("er.user_id = 42"));
        assert!(sql.contains("AS is_registered"));
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_capacity_and_reregistration() {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let mut users = Vec::new();
        for name in ["host", "first", "second"] {
            users.push(
                app.user_create(&UserCreateData {
                    email: format!("{name}+{}@example.com", crate::auth::session_token()),
                    password: "event-pass".into(),
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
                    name: "Events Hall".into(),
                    address: String::new(),
                    city: String::new(),
                    latitude: None,
                    longitude: None,
                    total_seats: 0,
                    opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let start = Utc::now() + Duration::days(3);
        let event = app
            .event_create(
                users[0].id,
                &EventData {
                    library_id: library.id,
                    title: "Reading circle".into(),
                    description: String::new(),
                    start_time: start,
                    end_time: start + Duration::hours(1),
                    capacity: 1,
                    is_premium: false,
                },
            )
            .await
            .unwrap();

        app.event_register(users[1].id, event.id).await.unwrap();
        let twice = app.event_register(users[1].id, event.id).await;
        assert!(matches!(twice, Err(ApiError::Conflict(_))), "{twice:?}");
        let full = app.event_register(users[2].id, event.id).await;
        assert!(matches!(full, Err(ApiError::Conflict(msg)) if msg == "this event is full"));

        let seen = app.event_get(users[1].id, event.id).await.unwrap();
        assert!(seen.is_registered);
        assert_eq!(seen.spots_left, 0);

        app.event_unregister(users[1].id, event.id).await.unwrap();
        app.event_register(users[2].id, event.id).await.unwrap();
        assert!(app.event_register(users[1].id, event.id).await.is_err());
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_premium_gate_start_and_attendance() {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let mut users = Vec::new();
        for name in ["organizer", "guest"] {
            users.push(
                app.user_create(&UserCreateData {
                    email: format!("{name}+{}@example.com", crate::auth::session_token()),
                    password: "event-pass".into(),
                    full_name: name.into(),
                })
                .await
                .unwrap(),
            );
        }
        let (organizer, guest) = (&users[0], &users[1]);

        let library = app
            .library_create(
                organizer.id,
                &LibraryData {
                    name: "Lecture Hall".into(),
                    address: String::new(),
                    city: String::new(),
                    latitude: None,
                    longitude: None,
                    total_seats: 0,
                    opening_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    closing_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                },
            )
            .await
            .unwrap();

        let start = Utc::now() + Duration::days(2);
        let event = |title: &str, is_premium| EventData {
            library_id: library.id,
            title: title.into(),
            description: String::new(),
            start_time: start,
            end_time: start + Duration::hours(2),
            capacity: 10,
            is_premium,
        };

        let premium = app
            .event_create(organizer.id, &event("Members only", true))
            .await
            .unwrap();
        let gated = app.event_register(guest.id, premium.id).await;
        assert!(matches!(gated, Err(ApiError::Forbidden(_))), "{gated:?}");

        let talk = app.event_create(organizer.id, &event("Open talk", false)).await.unwrap();
        let registration = app.event_register(guest.id, talk.id).await.unwrap();

        let early = app.registration_attend(organizer.id, talk.id, registration.id).await;
        assert!(matches!(early, Err(ApiError::BadRequest(_))), "{early:?}");

        sqlx::query("UPDATE events SET start_time = now() - interval '10 minutes' WHERE id = $1")
            .bind(talk.id)
            .execute(&app.pool)
            .await
            .unwrap();

        let late = app.event_register(organizer.id, talk.id).await;
        assert!(
            matches!(late, Err(ApiError::BadRequest(msg)) if msg == "this event has already started")
        );

        let attended = app
            .registration_attend(organizer.id, talk.id, registration.id)
            .await
            .unwrap();
        assert_eq!(attended.status, RegistrationStatus::Attended);

        let listed = app
            .registration_query(
                RegistrationScope::Event(talk.id),
                &RegistrationFilter {
                    status: Some(RegistrationStatus::Attended),
                },
                &PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(listed.total_count, 1);

        let again = app.registration_attend(organizer.id, talk.id, registration.id).await;
        assert!(matches!(again, Err(ApiError::BadRequest(_))), "{again:?}");
    }
}
