use super::{fetch_chunk, like, Entity};
use crate::{
    auth,
    error::{ApiError, ApiResult},
    models::{
        non_blank,
        user::{
            normalize_email, Credentials, LoginResult, PasswordChange, ProfileUpdate, Role,
            User, UserAdminUpdate, UserCreateData, UserFilter, UserLoginData,
        },
        Chunk, PageQuery,
    },
};
use chrono::{Duration, Utc};
use serde_json::json;

const USER_COLUMNS: &str =
    "u.id, u.email, u.full_name, u.role, u.library_id, u.is_active, u.date_joined, u.last_login";

impl Entity {
    pub async fn user_create(&self, data: &UserCreateData) -> ApiResult<User> {
        data.validate(self.settings.auth.min_password_length)
            .map_err(ApiError::BadRequest)?;

        let hash = auth::password_hash(&data.password)?;
        let sql = format!(
            "INSERT INTO users AS u (email, password_hash, full_name)
             VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(&data.email))
            .bind(hash)
            .bind(data.full_name.trim())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match ApiError::from(err) {
                ApiError::Conflict(_) => ApiError::conflict("a user with this email already exists"),
                other => other,
            })?;

        tracing::info!(user_id = user.id, "user registered");
        self.activity_log(Some(user.id), "user.register", "user", Some(user.id), json!({}))
            .await;

        Ok(user.with_display())
    }

    pub async fn user_login(&self, data: &UserLoginData) -> ApiResult<LoginResult> {
        let invalid = || ApiError::Unauthorized("unable to log in with provided credentials".into());

        let credentials = sqlx::query_as::<_, Credentials>(
            "SELECT id, password_hash, is_active FROM users WHERE email = $1",
        )
        .bind(normalize_email(&data.email))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(invalid)?;

        if !auth::password_verify(&data.password, &credentials.password_hash) {
            tracing::info!(user_id = credentials.id, "login rejected: bad password");
            return Err(invalid());
        }
        if !credentials.is_active {
            return Err(ApiError::Unauthorized("this account has been deactivated".into()));
        }

        let token = auth::session_token();
        let expires_at = Utc::now() + Duration::hours(self.settings.auth.session_ttl_hours);

        sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(auth::token_digest(&token))
            .bind(credentials.id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        sqlx::query("UPDATE users SET last_login = now() WHERE id = $1")
            .bind(credentials.id)
            .execute(&self.pool)
            .await?;

        // Expired sessions of this user are dropped on each login.
        sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at <= now()")
            .bind(credentials.id)
            .execute(&self.pool)
            .await?;

        let user = self.user_get(credentials.id).await?;
        tracing::info!(user_id = user.id, "user logged in");

        Ok(LoginResult {
            token,
            expires_at,
            user,
        })
    }

    pub async fn user_logout(&self, token: &str) -> ApiResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(auth::token_digest(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The active user owning a live session, if any.
    pub async fn user_by_token(&self, token: &str) -> ApiResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = $1 AND s.expires_at > now() AND u.is_active"
        );

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(auth::token_digest(token))
            .fetch_optional(&self.pool)
            .await?;

        Ok(user.map(User::with_display))
    }

    pub async fn user_get(&self, id: i64) -> ApiResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1");

        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("user not found"))?;

        Ok(user.with_display())
    }

    pub async fn user_query(&self, filter: &UserFilter, page: &PageQuery) -> ApiResult<Chunk<User>> {
        let search = non_blank(filter.search.as_deref()).map(like);

        let chunk: Chunk<User> = fetch_chunk(
            &self.pool,
            &format!("SELECT {USER_COLUMNS}"),
            "FROM users u",
            "u.date_joined DESC, u.id DESC",
            page,
            |qb| {
                if let Some(role) = filter.role {
                    qb.push(" AND u.role = ").push_bind(role);
                }
                if let Some(is_active) = filter.is_active {
                    qb.push(" AND u.is_active = ").push_bind(is_active);
                }
                if let Some(search) = &search {
                    qb.push(" AND (u.email ILIKE ")
                        .push_bind(search.clone())
                        .push(" OR u.full_name ILIKE ")
                        .push_bind(search.clone())
                        .push(")");
                }
            },
        )
        .await?;

        Ok(Chunk {
            items: chunk.items.into_iter().map(User::with_display).collect(),
            total_count: chunk.total_count,
        })
    }

    pub async fn user_update_profile(&self, id: i64, data: &ProfileUpdate) -> ApiResult<User> {
        if let Some(name) = &data.full_name {
            if name.trim().is_empty() {
                return Err(ApiError::bad_request("full_name must not be blank"));
            }
        }

        sqlx::query("UPDATE users SET full_name = COALESCE($2, full_name) WHERE id = $1")
            .bind(id)
            .bind(data.full_name.as_deref().map(str::trim))
            .execute(&self.pool)
            .await?;

        self.user_get(id).await
    }

    /// Changes the password and ends every session except `keep_token`.
    pub async fn user_change_password(
        &self,
        id: i64,
        keep_token: &str,
        data: &PasswordChange,
    ) -> ApiResult<()> {
        let min = self.settings.auth.min_password_length;
        if data.new_password.chars().count() < min {
            return Err(ApiError::bad_request(format!(
                "password must be at least {min} characters"
            )));
        }

        let credentials = sqlx::query_as::<_, Credentials>(
            "SELECT id, password_hash, is_active FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if !auth::password_verify(&data.current_password, &credentials.password_hash) {
            return Err(ApiError::bad_request("current password is incorrect"));
        }

        let hash = auth::password_hash(&data.new_password)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&mut tx)
            .await?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND token_hash <> $2")
            .bind(id)
            .bind(auth::token_digest(keep_token))
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        tracing::info!(user_id = id, "password changed");
        Ok(())
    }

    /// Role, activation and library assignment changes made by `actor`.
    pub async fn user_admin_update(
        &self,
        actor: &User,
        id: i64,
        update: &UserAdminUpdate,
    ) -> ApiResult<User> {
        let target = self.user_get(id).await?;

        if target.id == actor.id && (update.role.is_some() || update.is_active == Some(false)) {
            return Err(ApiError::bad_request(
                "you cannot change your own role or deactivate yourself",
            ));
        }
        if actor.role != Role::SuperAdmin {
            if update.touches_privileges() {
                return Err(ApiError::forbidden(
                    "only a super admin can change roles or library assignments",
                ));
            }
            if target.role != Role::Student {
                return Err(ApiError::forbidden("admins can only manage student accounts"));
            }
        }

        let (set_library, library_id) = match update.library_id {
            Some(library_id) => (true, library_id),
            None => (false, None),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE users SET
                role = COALESCE($2, role),
                is_active = COALESCE($3, is_active),
                library_id = CASE WHEN $4 THEN $5 ELSE library_id END
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.role)
        .bind(update.is_active)
        .bind(set_library)
        .bind(library_id)
        .execute(&mut tx)
        .await?;

        if update.is_active == Some(false) {
            sqlx::query("DELETE FROM sessions WHERE user_id = $1")
                .bind(id)
                .execute(&mut tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(actor_id = actor.id, user_id = id, "user updated by admin");
        self.activity_log(
            Some(actor.id),
            "user.update",
            "user",
            Some(id),
            json!({
                "role": update.role,
                "is_active": update.is_active,
                "library_id": update.library_id,
            }),
        )
        .await;

        self.user_get(id).await
    }

    pub async fn user_delete(&self, actor: &User, id: i64) -> ApiResult<()> {
        if actor.id == id {
            return Err(ApiError::bad_request("you cannot delete your own account"));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut tx)
            .await?
            .ok_or_else(|| ApiError::not_found("user not found"))?;

        // Reservations cascade with the user; copies on loan go back first.
        let released = sqlx::query(
            "UPDATE books b
             SET available_copies = LEAST(b.total_copies, b.available_copies + r.held)
             FROM (
                 SELECT book_id, COUNT(*)::int AS held FROM book_reservations
                 WHERE user_id = $1 AND status = 'APPROVED'
                 GROUP BY book_id
             ) r
             WHERE b.id = r.book_id",
        )
        .bind(id)
        .execute(&mut tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;

        tracing::warn!(actor_id = actor.id, user_id = id, released, "user deleted");
        self.activity_log(
            Some(actor.id),
            "user.delete",
            "user",
            Some(id),
            json!({ "released_books": released }),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        entity::Entity,
        error::ApiError,
        models::{
            book::BookData,
            library::LibraryData,
            user::{Role, User, UserAdminUpdate, UserCreateData, UserLoginData},
        },
        settings::Settings,
    };
    use chrono::NaiveTime;
    use std::env;

    async fn entity() -> Entity {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let entity = Entity::new(&settings).await.unwrap();
        entity.migrate().await.unwrap();
        entity
    }

    async fn user_with_role(app: &Entity, name: &str, role: Role) -> User {
        let user = app
            .user_create(&UserCreateData {
                email: format!("{name}+{}@example.com", crate::auth::session_token()),
                password: "member-pass".into(),
                full_name: name.into(),
            })
            .await
            .unwrap();

        sqlx::query("UPDATE users SET role = $2 WHERE id = $1")
            .bind(user.id)
            .bind(role)
            .execute(&app.pool)
            .await
            .unwrap();

        app.user_get(user.id).await.unwrap()
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_register_login_logout() {
        let app = entity().await;
        let email = format!("alice+{}@example.com", crate::auth::session_token());

        app.user_create(&UserCreateData {
            email: email.clone(),
            password: "alice-password".into(),
            full_name: "Alice".into(),
        })
        .await
        .unwrap();

        let login = app
            .user_login(&UserLoginData {
                email: email.to_uppercase(),
                password: "alice-password".into(),
            })
            .await
            .unwrap();

        let user = app.user_by_token(&login.token).await.unwrap().unwrap();
        assert_eq!(user.email, email.to_lowercase());

        app.user_logout(&login.token).await.unwrap();
        assert!(app.user_by_token(&login.token).await.unwrap().is_none());

        let wrong = app
            .user_login(&UserLoginData {
                email,
                password: "nope".into(),
            })
            .await;
        assert!(wrong.is_err());
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_admin_update_guards() {
        let app = entity().await;
        let root = user_with_role(&app, "root", Role::SuperAdmin).await;
        let admin = user_with_role(&app, "admin", Role::Admin).await;
        let other_admin = user_with_role(&app, "other", Role::Admin).await;
        let student = user_with_role(&app, "student", Role::Student).await;

        let demote = UserAdminUpdate {
            role: Some(Role::Student),
            ..UserAdminUpdate::default()
        };
        let deactivate = UserAdminUpdate {
            is_active: Some(false),
            ..UserAdminUpdate::default()
        };

        let own_role = app.user_admin_update(&root, root.id, &demote).await;
        assert!(matches!(own_role, Err(ApiError::BadRequest(_))), "{own_role:?}");
        let own_account = app.user_admin_update(&admin, admin.id, &deactivate).await;
        assert!(matches!(own_account, Err(ApiError::BadRequest(_))), "{own_account:?}");

        let peer = app.user_admin_update(&admin, other_admin.id, &deactivate).await;
        assert!(matches!(peer, Err(ApiError::Forbidden(_))), "{peer:?}");
        let role_change = app.user_admin_update(&admin, student.id, &demote).await;
        assert!(matches!(role_change, Err(ApiError::Forbidden(_))), "{role_change:?}");

        let deactivated = app.user_admin_update(&admin, student.id, &deactivate).await.unwrap();
        assert!(!deactivated.is_active);

        let own_delete = app.user_delete(&root, root.id).await;
        assert!(matches!(own_delete, Err(ApiError::BadRequest(_))), "{own_delete:?}");
    }

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_delete_returns_borrowed_copies() {
        let app = entity().await;
        let root = user_with_role(&app, "root", Role::SuperAdmin).await;
        let borrower = user_with_role(&app, "borrower", Role::Student).await;
        let next = user_with_role(&app, "next", Role::Student).await;

        let library = app
            .library_create(
                root.id,
                &LibraryData {
                    name: "Lending".into(),
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

        let book = app
            .book_create(
                root.id,
                BookData {
                    library_id: library.id,
                    title: "Only Copy".into(),
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

        let loan = app.reservation_create(borrower.id, book.id).await.unwrap();
        app.reservation_approve(root.id, loan.id).await.unwrap();
        assert_eq!(app.book_get(book.id).await.unwrap().available_copies, 0);

        app.user_delete(&root, borrower.id).await.unwrap();

        let book = app.book_get(book.id).await.unwrap();
        assert_eq!(book.available_copies, book.total_copies);
        app.reservation_create(next.id, book.id).await.unwrap();
    }
}
