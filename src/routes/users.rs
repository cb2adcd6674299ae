use super::paged;
use crate::{
    auth::AuthUser,
    entity::Entity,
    error::ApiResult,
    models::{
        user::{Role, UserAdminUpdate, UserFilter},
        PageQuery,
    },
};
use actix_web::{
    delete, get, patch,
    web::{Data, Json, Path, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(user_query)
        .service(user_get)
        .service(user_update)
        .service(user_delete);
}

#[get("/users/")]
async fn user_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<UserFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    let chunk = entity.user_query(&filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}

#[get("/users/{id}/")]
async fn user_get(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    let user = entity.user_get(*id).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[patch("/users/{id}/")]
async fn user_update(
    auth: AuthUser,
    id: Path<i64>,
    data: Json<UserAdminUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    let user = entity.user_admin_update(&auth.user, *id, &data).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[delete("/users/{id}/")]
async fn user_delete(auth: AuthUser, id: Path<i64>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    auth.require(Role::SuperAdmin)?;
    entity.user_delete(&auth.user, *id).await?;
    Ok(HttpResponse::NoContent().finish())
}
