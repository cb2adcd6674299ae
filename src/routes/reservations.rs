use super::{paged, require_owner_or_admin};
use crate::{
    auth::AuthUser,
    entity::{Entity, Scope, ScopeQuery},
    error::ApiResult,
    models::{
        reservation::{RejectData, ReservationData, ReservationFilter},
        PageQuery,
    },
};
use actix_web::{
    get, post,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(reservation_query)
        .service(reservation_create)
        .service(reservation_get)
        .service(reservation_cancel)
        .service(reservation_approve)
        .service(reservation_reject)
        .service(reservation_return);
}

#[get("/reservations/")]
async fn reservation_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    scope: Query<ScopeQuery>,
    filter: Query<ReservationFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let scope = Scope::of(&auth, &scope);
    let chunk = entity.reservation_query(scope, &filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/reservations/")]
async fn reservation_create(
    auth: AuthUser,
    data: Json<ReservationData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let reservation = entity.reservation_create(auth.id(), data.book_id).await?;
    Ok(HttpResponse::Created().json(reservation))
}

#[get("/reservations/{id}/")]
async fn reservation_get(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let reservation = entity.reservation_get(*id).await?;
    require_owner_or_admin(&auth, reservation.user_id, reservation.library_id)?;
    Ok(HttpResponse::Ok().json(reservation))
}

#[post("/reservations/{id}/cancel/")]
async fn reservation_cancel(
    auth: AuthUser,
    id: Path<i64>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let reservation = entity.reservation_cancel(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(reservation))
}

#[post("/reservations/{id}/approve/")]
async fn reservation_approve(
    auth: AuthUser,
    id: Path<i64>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let current = entity.reservation_get(*id).await?;
    auth.require_library(current.library_id)?;
    let reservation = entity.reservation_approve(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(reservation))
}

#[post("/reservations/{id}/reject/")]
async fn reservation_reject(
    auth: AuthUser,
    id: Path<i64>,
    data: Option<Json<RejectData>>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let current = entity.reservation_get(*id).await?;
    auth.require_library(current.library_id)?;
    let reason = data.and_then(|data| data.into_inner().reason);
    let reservation = entity
        .reservation_reject(auth.id(), *id, reason.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(reservation))
}

#[post("/reservations/{id}/return/")]
async fn reservation_return(
    auth: AuthUser,
    id: Path<i64>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let current = entity.reservation_get(*id).await?;
    auth.require_library(current.library_id)?;
    let reservation = entity.reservation_return(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(reservation))
}
