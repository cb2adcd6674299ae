use crate::{
    auth::AuthUser,
    entity::Entity,
    error::ApiResult,
    models::{analytics::AnalyticsQuery, user::Role},
};
use actix_web::{
    get,
    web::{Data, Query, ServiceConfig},
    HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(overview)
        .service(bookings)
        .service(popular_books)
        .service(events)
        .service(subscriptions)
        .service(libraries);
}

/// The library the dashboard covers: an admin's own, or the one a super
/// admin asked for.
fn library_of(auth: &AuthUser, query: &AnalyticsQuery) -> ApiResult<Option<i64>> {
    auth.require(Role::Admin)?;
    Ok(auth.library_scope()?.or(query.library))
}

#[get("/analytics/overview/")]
async fn overview(
    auth: AuthUser,
    query: Query<AnalyticsQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let library = library_of(&auth, &query)?;
    Ok(HttpResponse::Ok().json(entity.analytics_overview(library).await?))
}

#[get("/analytics/bookings/")]
async fn bookings(
    auth: AuthUser,
    query: Query<AnalyticsQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let library = library_of(&auth, &query)?;
    Ok(HttpResponse::Ok().json(entity.analytics_bookings(library, &query).await?))
}

#[get("/analytics/books/popular/")]
async fn popular_books(
    auth: AuthUser,
    query: Query<AnalyticsQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let library = library_of(&auth, &query)?;
    Ok(HttpResponse::Ok().json(entity.analytics_popular_books(library, &query).await?))
}

#[get("/analytics/events/")]
async fn events(
    auth: AuthUser,
    query: Query<AnalyticsQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let library = library_of(&auth, &query)?;
    Ok(HttpResponse::Ok().json(entity.analytics_events(library, &query).await?))
}

#[get("/analytics/subscriptions/")]
async fn subscriptions(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    Ok(HttpResponse::Ok().json(entity.analytics_subscriptions().await?))
}

#[get("/analytics/libraries/")]
async fn libraries(
    auth: AuthUser,
    query: Query<AnalyticsQuery>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let library = library_of(&auth, &query)?;
    Ok(HttpResponse::Ok().json(entity.analytics_libraries(library).await?))
}
