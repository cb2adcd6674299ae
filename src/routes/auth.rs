use crate::{
    auth::AuthUser,
    entity::Entity,
    error::ApiResult,
    models::user::{PasswordChange, ProfileUpdate, UserCreateData, UserLoginData},
};
use actix_web::{
    get, patch, post,
    web::{Data, Json, ServiceConfig},
    HttpResponse,
};
use serde_json::json;

pub fn config(cfg: &mut ServiceConfig) {
    cfg.service(register)
        .service(login)
        .service(logout)
        .service(me)
        .service(me_update)
        .service(change_password);
}

#[post("/auth/register/")]
async fn register(data: Json<UserCreateData>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let user = entity.user_create(&data).await?;
    Ok(HttpResponse::Created().json(user))
}

#[post("/auth/login/")]
async fn login(data: Json<UserLoginData>, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let result = entity.user_login(&data).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[post("/auth/logout/")]
async fn logout(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    entity.user_logout(&auth.token).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// The caller with their current plan limits.
#[get("/auth/me/")]
async fn me(auth: AuthUser, entity: Data<Entity>) -> ApiResult<HttpResponse> {
    let limits = entity.access_limits(auth.id()).await?;
    Ok(HttpResponse::Ok().json(json!({ "user": auth.user, "limits": limits })))
}

#[patch("/auth/me/")]
async fn me_update(
    auth: AuthUser,
    data: Json<ProfileUpdate>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    let user = entity.user_update_profile(auth.id(), &data).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[post("/auth/change-password/")]
async fn change_password(
    auth: AuthUser,
    data: Json<PasswordChange>,
    entity: Data<Entity>,
) -> ApiResult<HttpResponse> {
    entity
        .user_change_password(auth.id(), &auth.token, &data)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "detail": "password changed" })))
}
