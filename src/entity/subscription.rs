use super::{fetch_chunk, Entity};
use crate::{
    error::{ApiError, ApiResult},
    models::{
        subscription::{
            AccessLimits, PlanData, PlanUpdate, SubscriptionPlan, UserSubscription,
        },
        Chunk, PageQuery,
    },
};
use chrono::{Duration, Utc};
use serde_json::json;

const SUBSCRIPTION_SELECT: &str = "SELECT s.*, p.name AS plan_name";
const SUBSCRIPTION_FROM: &str =
    "FROM user_subscriptions s JOIN subscription_plans p ON p.id = s.plan_id";

impl Entity {
    pub async fn plan_query(&self, include_inactive: bool) -> ApiResult<Vec<SubscriptionPlan>> {
        let plans = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT * FROM subscription_plans WHERE is_active OR $1 ORDER BY price_cents, id",
        )
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn plan_get(&self, id: i64) -> ApiResult<SubscriptionPlan> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("plan not found"))?;

        Ok(plan)
    }

    pub async fn plan_create(&self, actor_id: i64, data: &PlanData) -> ApiResult<SubscriptionPlan> {
        data.validate().map_err(ApiError::BadRequest)?;

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "INSERT INTO subscription_plans
                (name, description, price_cents, duration_days, max_active_reservations,
                 max_booking_hours, premium_access, created_by, updated_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
             RETURNING *",
        )
        .bind(data.name.trim())
        .bind(&data.description)
        .bind(data.price_cents)
        .bind(data.duration_days)
        .bind(data.max_active_reservations)
        .bind(data.max_booking_hours)
        .bind(data.premium_access)
        .bind(actor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::conflict("a plan with this name already exists"),
            other => other,
        })?;

        tracing::info!(actor_id, plan_id = plan.id, "plan created");
        self.activity_log(
            Some(actor_id),
            "plan.create",
            "plan",
            Some(plan.id),
            json!({ "name": plan.name, "price_cents": plan.price_cents }),
        )
        .await;

        Ok(plan)
    }

    /// Changes apply to future purchases; running subscriptions keep the
    /// price they were bought at.
    pub async fn plan_update(&self, actor_id: i64, id: i64, update: &PlanUpdate) -> ApiResult<SubscriptionPlan> {
        update.validate().map_err(ApiError::BadRequest)?;

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "UPDATE subscription_plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                price_cents = COALESCE($4, price_cents),
                duration_days = COALESCE($5, duration_days),
                max_active_reservations = COALESCE($6, max_active_reservations),
                max_booking_hours = COALESCE($7, max_booking_hours),
                premium_access = COALESCE($8, premium_access),
                is_active = COALESCE($9, is_active),
                updated_by = $10
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.description.as_deref())
        .bind(update.price_cents)
        .bind(update.duration_days)
        .bind(update.max_active_reservations)
        .bind(update.max_booking_hours)
        .bind(update.premium_access)
        .bind(update.is_active)
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("plan not found"))?;

        tracing::info!(actor_id, plan_id = id, "plan updated");
        self.activity_log(Some(actor_id), "plan.update", "plan", Some(id), json!({}))
            .await;

        Ok(plan)
    }

    /// Persists EXPIRED for every ACTIVE subscription past its expiry.
    pub async fn subscription_sweep(&self) -> ApiResult<u64> {
        let expired = sqlx::query(
            "UPDATE user_subscriptions SET status = 'EXPIRED'
             WHERE status = 'ACTIVE' AND expires_at <= now()",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if expired > 0 {
            tracing::info!(expired, "subscriptions expired");
        }
        Ok(expired)
    }

    pub async fn subscription_current(&self, user_id: i64) -> ApiResult<Option<UserSubscription>> {
        self.subscription_sweep().await?;

        let sql = format!(
            "{SUBSCRIPTION_SELECT} {SUBSCRIPTION_FROM} WHERE s.user_id = $1 AND s.status = 'ACTIVE'"
        );
        let subscription = sqlx::query_as::<_, UserSubscription>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(subscription.map(|subscription| subscription.with_display(Utc::now())))
    }

    /// Activates the plan immediately at its current price.
    pub async fn subscription_purchase(&self, user_id: i64, plan_id: i64) -> ApiResult<UserSubscription> {
        let plan = self.plan_get(plan_id).await?;
        if !plan.is_active {
            return Err(ApiError::bad_request("this plan is no longer offered"));
        }

        self.subscription_sweep().await?;

        let expires_at = Utc::now() + Duration::days(i64::from(plan.duration_days));
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO user_subscriptions (user_id, plan_id, expires_at, amount_cents)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id)
        .bind(plan.id)
        .bind(expires_at)
        .bind(plan.price_cents)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::conflict("you already have an active subscription"),
            other => other,
        })?;

        tracing::info!(user_id, plan_id, subscription_id = id, "subscription purchased");
        self.activity_log(
            Some(user_id),
            "subscription.purchase",
            "subscription",
            Some(id),
            json!({ "plan_id": plan.id, "amount_cents": plan.price_cents }),
        )
        .await;

        self.subscription_get(id).await
    }

    pub async fn subscription_cancel(&self, user_id: i64) -> ApiResult<UserSubscription> {
        self.subscription_sweep().await?;

        let cancelled: Option<(i64,)> = sqlx::query_as(
            "UPDATE user_subscriptions SET status = 'CANCELLED', cancelled_at = now()
             WHERE user_id = $1 AND status = 'ACTIVE'
             RETURNING id",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (id,) = cancelled.ok_or_else(|| ApiError::not_found("you have no active subscription"))?;

        tracing::info!(user_id, subscription_id = id, "subscription cancelled");
        self.activity_log(Some(user_id), "subscription.cancel", "subscription", Some(id), json!({}))
            .await;

        self.subscription_get(id).await
    }

    pub async fn subscription_history(
        &self,
        user_id: i64,
        page: &PageQuery,
    ) -> ApiResult<Chunk<UserSubscription>> {
        self.subscription_sweep().await?;

        let chunk: Chunk<UserSubscription> = fetch_chunk(
            &self.pool,
            SUBSCRIPTION_SELECT,
            SUBSCRIPTION_FROM,
            "s.started_at DESC, s.id DESC",
            page,
            |qb| {
                qb.push(" AND s.user_id = ").push_bind(user_id);
            },
        )
        .await?;

        let now = Utc::now();
        Ok(Chunk {
            items: chunk
                .items
                .into_iter()
                .map(|subscription| subscription.with_display(now))
                .collect(),
            total_count: chunk.total_count,
        })
    }

    async fn subscription_get(&self, id: i64) -> ApiResult<UserSubscription> {
        let sql = format!("{SUBSCRIPTION_SELECT} {SUBSCRIPTION_FROM} WHERE s.id = $1");

        let subscription = sqlx::query_as::<_, UserSubscription>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(subscription.with_display(Utc::now()))
    }

    /// Limits from the user's unexpired ACTIVE plan, or the free tier.
    pub async fn access_limits(&self, user_id: i64) -> ApiResult<AccessLimits> {
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            "SELECT p.* FROM user_subscriptions s
             JOIN subscription_plans p ON p.id = s.plan_id
             WHERE s.user_id = $1 AND s.status = 'ACTIVE' AND s.expires_at > now()",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(AccessLimits::for_plan(plan.as_ref(), &self.settings))
    }
}
