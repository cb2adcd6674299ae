use super::paged;
use crate::{
    auth::AuthUser,
    entity::Entity,
    error::ApiResult,
    models::{
        subscription::{PlanData, PlanUpdate, PurchaseData},
        user::Role,
        PageQuery,
    },
};
use actix_web::{
    get, patch, post,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};
use serde_json::json;

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(plan_query)
        .service(plan_create)
        .service(plan_get)
        .service(plan_update)
        .service(subscription_current)
        .service(subscription_purchase)
        .service(subscription_cancel)
        .service(subscription_history);
}

/// Offered plans; super admins also see retired ones.
#[get("/subscriptions/plans/")]
async fn plan_query(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let plans = entity.plan_query(auth.role() == Role::SuperAdmin).await?;
    Ok(HttpResponse::Ok().json(plans))
}

#[post("/subscriptions/plans/")]
async fn plan_create(auth: AuthUser, data: Json<PlanData>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let plan = entity.plan_create(auth.id(), &data).await?;
    Ok(HttpResponse::Created().json(plan))
}

#[get("/subscriptions/plans/{id}/")]
async fn plan_get(_auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let plan = entity.plan_get(*id).await?;
    Ok(HttpResponse::Ok().json(plan))
}

#[patch("/subscriptions/plans/{id}/")]
async fn plan_update(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<PlanUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let plan = entity.plan_update(auth.id(), *id, &data).await?;
    Ok(HttpResponse::Ok().json(plan))
}

#[get("/subscriptions/current/")]
async fn subscription_current(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let subscription = entity.subscription_current(auth.id()).await?;
    let limits = entity.access_limits(auth.id()).await?;
    Ok(HttpResponse::Ok().json(json!({ "subscription": subscription, "limits": limits })))
}

#[post("/subscriptions/purchase/")]
async fn subscription_purchase(
    auth: AuthUser,
    data: Json<PurchaseData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let subscription = entity.subscription_purchase(auth.id(), data.plan_id).await?;
    Ok(HttpResponse::Created().json(subscription))
}

#[post("/subscriptions/cancel/")]
async fn subscription_cancel(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let subscription = entity.subscription_cancel(auth.id()).await?;
    Ok(HttpResponse::Ok().json(subscription))
}

#[get("/subscriptions/history/")]
async fn subscription_history(
    auth: AuthUser,
    page: Query<PageQuery>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let chunk = entity.subscription_history(auth.id(), &page).await?;
    Ok(paged(chunk, &page, &req))
}
