use super::{paged, require_owner_or_admin};
use crate::{
    auth::AuthUser,
    entity::{Entity, Scope, ScopeQuery},
    error::ApiResult,
    models::{
        booking::{BookingData, BookingFilter},
        PageQuery,
    },
};
use actix_web::{
    get, post,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(booking_query)
        .service(booking_create)
        .service(booking_get)
        .service(booking_cancel);
}

#[get("/bookings/")]
async fn booking_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    scope: Query<ScopeQuery>,
    filter: Query<BookingFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let scope = Scope::of(&auth, &scope);
    let chunk = entity.booking_query(scope, &filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/bookings/")]
async fn booking_create(
    auth: AuthUser,
    data: Json<BookingData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let booking = entity.booking_create(auth.id(), &data).await?;
    Ok(HttpResponse::Created().json(booking))
}

#[get("/bookings/{id}/")]
async fn booking_get(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let booking = entity.booking_get(*id).await?;
    require_owner_or_admin(&auth, booking.user_id, booking.library_id)?;
    Ok(HttpResponse::Ok().json(booking))
}

#[post("/bookings/{id}/cancel/")]
async fn booking_cancel(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let current = entity.booking_get(*id).await?;
    require_owner_or_admin(&auth, current.user_id, current.library_id)?;
    let booking = entity.booking_cancel(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(booking))
}
