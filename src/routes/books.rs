use super::paged;
use crate::{
    auth::AuthUser,
    catalog::Catalog,
    entity::Entity,
    error::ApiResult,
    models::{
        book::{BookData, BookFilter, BookUpdate, LookupQuery, ReviewData},
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
    cfg.service(book_query)
        .service(book_create)
        .service(book_lookup)
        .service(book_get)
        .service(book_update)
        .service(book_delete)
        .service(review_query)
        .service(review_create);
}

#[get("/books/")]
async fn book_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<BookFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let mut filter = filter.into_inner();
    if !auth.sees_inactive() {
        filter.library_active = Some(true);
    }
    let chunk = entity.book_query(&filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/books/")]
async fn book_create(
    auth: AuthUser,
    data: Json<BookData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require_library(data.library_id)?;
    let book = entity.book_create(auth.id(), data.into_inner()).await?;
    Ok(HttpResponse::Created().json(book))
}

/// Catalog record for prefilling a new book.
#[get("/books/lookup/")]
async fn book_lookup(
    auth: AuthUser,
    query: Query<LookupQuery>,
    catalog: Data<Catalog>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    let book = catalog.book_lookup(&query.isbn).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[get("/books/{id}/")]
async fn book_get(_auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let book = entity.book_get(*id).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[patch("/books/{id}/")]
async fn book_update(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<BookUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let current = entity.book_get(*id).await?;
    auth.require_library(current.library_id)?;
    let book = entity.book_update(auth.id(), *id, data.into_inner()).await?;
    Ok(HttpResponse::Ok().json(book))
}

#[delete("/books/{id}/")]
async fn book_delete(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let current = entity.book_get(*id).await?;
    auth.require_library(current.library_id)?;
    entity.book_delete(auth.id(), *id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/books/{id}/reviews/")]
async fn review_query(
    _auth: AuthUser,
    id: Path<i64>,
    page: Query<PageQuery>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    let chunk = entity.review_query(*id, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[post("/books/{id}/reviews/")]
async fn review_create(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<ReviewData>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let review = entity.review_create(auth.id(), *id, &data).await?;
    Ok(HttpResponse::Created().json(review))
}
