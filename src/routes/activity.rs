use super::paged;
use crate::{
    auth::AuthUser,
    entity::Entity,
    error::ApiResult,
    models::{activity::ActivityFilter, user::Role, PageQuery},
};
use actix_web::{
    get,
    web::{Data, Query, ServiceConfig},
    HttpRequest, HttpResponse,
};

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(activity_query);
}

/// Super admins see every entry; admins see their own.
#[get("/activity/")]
async fn activity_query(
    auth: AuthUser,
    page: Query<PageQuery>,
    filter: Query<ActivityFilter>,
    entity: Data<Entity>,
    req: HttpRequest,
) -> ApiResult<HttpResponse> {
    auth.require(Role::Admin)?;
    let only_user = (auth.role() != Role::SuperAdmin).then(|| auth.id());
    let chunk = entity.activity_query(only_user, &filter, &page).await?;
    Ok(paged(chunk, &page, &req))
}
