use super::paged;
use crate::{
    auth::AuthUser,
    entity::{Entity, RegistrationScope},
    error::ApiResult,
    models::{
        event::{EventData, EventFilter, EventUpdate, RegistrationFilter},
        PageQuery,
    },
};
use actix_web::{
    delete, get, patch, post,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(event_query)
        .service(event_create)
        .service(event_get)
        .service(event_update)
        .service(event_delete)
        .service(event_cancel)
        .service(event_register)
        .service(event_unregister)
        .service(event_registrations)
        .service(registration_attend)
        .service(registration_query);
}

#[get("/events/")]
async fn event_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<EventFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let chunk = entity.event_query(auth.id(), &filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/events/")]
async fn event_create(
    auth: AuthUser,
    data: Json<EventData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require_library(data.library_id)?;
    let event = entity.event_create(auth.id(), &data).await?;
    Ok(HttpResponse::Created().json(event))
}

#[get("/events/{id}/")]
async fn event_get(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let event = entity.event_get(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(event))
}

#[patch("/events/{id}/")]
async fn event_update(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<EventUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let current = entity.event_get(auth.id(), *id).await?;
    auth.require_library(current.library_id)?;
    let event = entity.event_update(auth.id(), *id, &data).await?;
    Ok(HttpResponse::Ok().json(event))
}

#[delete("/events/{id}/")]
async fn event_delete(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let current = entity.event_get(auth.id(), *id).await?;
    auth.require_library(current.library_id)?;
    entity.event_delete(auth.id(), *id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/events/{id}/cancel/")]
async fn event_cancel(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let current = entity.event_get(auth.id(), *id).await?;
    auth.require_library(current.library_id)?;
    let event = entity.event_cancel(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(event))
}

#[post("/events/{id}/register/")]
async fn event_register(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let registration = entity.event_register(auth.id(), *id).await?;
    Ok(HttpResponse::Created().json(registration))
}

#[post("/events/{id}/unregister/")]
async fn event_unregister(
    auth: AuthUser,
    id: Path<i64>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let registration = entity.event_unregister(auth.id(), *id).await?;
    Ok(HttpResponse::Ok().json(registration))
}

/// Attendee list of one event.
#[get("/events/{id}/registrations/")]
async fn event_registrations(
    auth: AuthUser,
    id: Path<i64>,
    page: Query<PageQuery>,
    filter: Query<RegistrationFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let event = entity.event_get(auth.id(), *id).await?;
    auth.require_library(event.library_id)?;
    let chunk = entity
        .registration_query(RegistrationScope::Event(event.id), &filter, &page)
        .await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/events/{id}/registrations/{registration_id}/attend/")]
async fn registration_attend(
    auth: AuthUser,
    path: Path<(i64, i64)>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let (event_id, registration_id) = path.into_inner();
    let event = entity.event_get(auth.id(), event_id).await?;
    auth.require_library(event.library_id)?;
    let registration = entity
        .registration_attend(auth.id(), event.id, registration_id)
        .await?;
    Ok(HttpResponse::Ok().json(registration))
}

/// The caller's own registrations.
#[get("/registrations/")]
async fn registration_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<RegistrationFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let chunk = entity
        .registration_query(RegistrationScope::User(auth.id()), &filter, &page)
        .await?;
    Ok(paged(chunk, &page, &req))
}
