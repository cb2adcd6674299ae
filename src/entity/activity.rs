use super::{fetch_chunk, Entity};
use crate::{
    error::ApiResult,
    models::{
        activity::{ActivityFilter, ActivityLog},
        non_blank, Chunk, PageQuery,
    },
};
use serde_json::Value;

impl Entity {
    /// Records an action. A failed write is logged and otherwise ignored so
    /// the action itself still succeeds.
    pub async fn activity_log(
        &self,
        user_id: Option<i64>,
        action: &str,
        target_type: &str,
        target_id: Option<i64>,
        details: Value,
    ) {
        let result = sqlx::query(
            "INSERT INTO activity_logs (user_id, action, target_type, target_id, details)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(details)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(action, target_type, ?target_id, "activity log write failed: {err}");
        }
    }

    /// `only_user` confines the listing to one actor's entries.
    pub async fn activity_query(
        &self,
        only_user: Option<i64>,
        filter: &ActivityFilter,
        page: &PageQuery,
    ) -> ApiResult<Chunk<ActivityLog>> {
        let action = non_blank(filter.action.as_deref()).map(str::to_string);
        let target_type = non_blank(filter.target_type.as_deref()).map(str::to_string);

        let chunk = fetch_chunk(
            &self.pool,
            "SELECT a.*, u.email AS user_email",
            "FROM activity_logs a LEFT JOIN users u ON u.id = a.user_id",
            "a.created_at DESC, a.id DESC",
            page,
            |qb| {
                if let Some(user) = only_user.or(filter.user) {
                    qb.push(" AND a.user_id = ").push_bind(user);
                }
                if let Some(action) = &action {
                    qb.push(" AND a.action = ").push_bind(action.clone());
                }
                if let Some(target_type) = &target_type {
                    qb.push(" AND a.target_type = ").push_bind(target_type.clone());
                }
            },
        )
        .await?;

        Ok(chunk)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        entity::Entity,
        models::{activity::ActivityFilter, user::UserCreateData, PageQuery},
        settings::Settings,
    };
    use std::env;

    #[ignore = "requires DATABASE_URL"]
    #[actix_web::test]
    async fn test_registration_is_logged() {
        let mut settings = Settings::default();
        settings.database.url = env::var("DATABASE_URL").unwrap();
        let app = Entity::new(&settings).await.unwrap();
        app.migrate().await.unwrap();

        let user = app
            .user_create(&UserCreateData {
                email: format!("log+{}@example.com", crate::auth::session_token()),
                password: "logged-in".into(),
                full_name: "Logged".into(),
            })
            .await
            .unwrap();

        let logs = app
            .activity_query(
                Some(user.id),
                &ActivityFilter {
                    action: Some("user.register".into()),
                    ..ActivityFilter::default()
                },
                &PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(logs.total_count, 1);
        assert_eq!(logs.items[0].user_email.as_deref(), Some(user.email.as_str()));
    }
}
