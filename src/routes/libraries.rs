use super::paged;
use crate::{
    auth::AuthUser,
    entity::Entity,
    error::{ApiError, ApiResult},
    models::{
        library::{LibraryData, LibraryFilter, LibraryUpdate, NearbyQuery, SeatQuery},
        user::Role,
        PageQuery,
    },
};
use actix_web::{
    delete, get, patch, post,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(library_query)
        .service(library_create)
        .service(library_nearby)
        .service(library_get)
        .service(library_update)
        .service(library_delete)
        .service(seat_query);
}

#[get("/libraries/")]
async fn library_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<LibraryFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let mut filter = filter.into_inner();
    if !auth.sees_inactive() {
        filter.is_active = Some(true);
    }
    let chunk = entity.library_query(&filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/libraries/")]
async fn library_create(
    auth: AuthUser,
    data: Json<LibraryData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let library = entity.library_create(auth.id(), &data).await?;
    Ok(HttpResponse::Created().json(library))
}

#[get("/libraries/nearby/")]
async fn library_nearby(
    _auth: AuthUser,
    query: Query<NearbyQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let libraries = entity.library_nearby(&query).await?;
    Ok(HttpResponse::Ok().json(libraries))
}

#[get("/libraries/{id}/")]
async fn library_get(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let library = entity.library_get(*id).await?;
    if !library.is_active && !auth.sees_inactive() {
        return Err(ApiError::not_found("library not found"));
    }
    Ok(HttpResponse::Ok().json(library))
}

#[patch("/libraries/{id}/")]
async fn library_update(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<LibraryUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    let library = entity.library_update(auth.id(), *id, &data).await?;
    Ok(HttpResponse::Ok().json(library))
}

#[delete("/libraries/{id}/")]
async fn library_delete(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    entity.library_deactivate(auth.id(), *id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/libraries/{id}/seats/")]
async fn seat_query(
    _auth: AuthUser,
    id: Path<i64>,
    query: Query<SeatQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let seats = entity.seat_query(*id, &query).await?;
    Ok(HttpResponse::Ok().json(seats))
}
