//! HTTP surface. Paths end with `/`; `NormalizePath` in `main` appends it
//! to requests that omit it.

mod activity;
mod analytics;
mod auth;
mod books;
mod bookings;
mod events;
mod libraries;
mod reservations;
mod subscriptions;
mod users;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    models::{Chunk, Page, PageQuery},
};
use actix_web::{
    get,
    web::{self, ServiceConfig},
    HttpRequest, HttpResponse,
};
use serde::Serialize;
use serde_json::json;

pub fn config(cfg: &mut ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| {
        ApiError::bad_request(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _| {
        ApiError::bad_request(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _| {
        ApiError::not_found(err.to_string()).into()
    }))
    .service(health);

    auth::config(cfg);
    users::config(cfg);
    libraries::config(cfg);
    books::config(cfg);
    reservations::config(cfg);
    bookings::config(cfg);
    events::config(cfg);
    subscriptions::config(cfg);
    analytics::config(cfg);
    activity::config(cfg);
}

#[get("/health/")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn fallback() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "detail": "no such endpoint" }))
}

/// Wraps a chunk as a `{count, next, previous, results}` page whose links
/// point back at the request.
fn paged<T: Serialize>(chunk: Chunk<T>, page: &PageQuery, req: &HttpRequest) -> HttpResponse {
    HttpResponse::Ok().json(Page::new(chunk, page, req.path(), req.query_string()))
}

/// The owner of a row, or an admin of the library it belongs to.
fn require_owner_or_admin(auth: &AuthUser, owner_id: i64, library_id: i64) -> ApiResult<()> {
    if auth.id() == owner_id {
        return Ok(());
    }
    auth.require_library(library_id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{entity::Entity, models::user::{Role, User}, settings::Settings};
    use actix_web::{
        body::to_bytes,
        http::{header, StatusCode},
        middleware::{NormalizePath, TrailingSlash},
        test::{call_service, init_service, TestRequest},
        web::Data,
        App,
    };
    use chrono::Utc;

    macro_rules! app {
        () => {{
            let settings = Settings::default();
            let entity = Entity::new_lazy(&settings).unwrap();
            init_service(
                App::new()
                    .app_data(Data::new(entity))
                    .wrap(NormalizePath::new(TrailingSlash::Always))
                    .configure(config)
                    .default_service(web::route().to(fallback)),
            )
            .await
        }};
    }

    async fn detail(res: actix_web::dev::ServiceResponse) -> String {
        let body = to_bytes(res.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        value["detail"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn test_health() {
        let app = app!();
        let req = TestRequest::get().uri("/health").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_missing_token_is_401() {
        let app = app!();
        let req = TestRequest::get().uri("/reservations/").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(detail(res).await, "authentication credentials were not provided");
    }

    #[actix_web::test]
    async fn test_unknown_path_is_404_json() {
        let app = app!();
        let req = TestRequest::get().uri("/nowhere/").to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(detail(res).await, "no such endpoint");
    }

    #[actix_web::test]
    async fn test_malformed_json_is_400() {
        let app = app!();
        let req = TestRequest::post()
            .uri("/auth/login/")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{\"email\": ")
            .to_request();
        let res = call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(!detail(res).await.is_empty());
    }

    #[test]
    fn test_owner_or_admin() {
        let auth = |id, role, library_id| AuthUser {
            user: User {
                id,
                email: "x@example.com".into(),
                full_name: "X".into(),
                role,
                role_display: String::new(),
                library_id,
                is_active: true,
                date_joined: Utc::now(),
                last_login: None,
            },
            token: "t".into(),
        };

        assert!(require_owner_or_admin(&auth(1, Role::Student, None), 1, 9).is_ok());
        assert!(require_owner_or_admin(&auth(2, Role::Student, None), 1, 9).is_err());
        assert!(require_owner_or_admin(&auth(2, Role::Admin, Some(9)), 1, 9).is_ok());
        assert!(require_owner_or_admin(&auth(2, Role::Admin, Some(8)), 1, 9).is_err());
        assert!(require_owner_or_admin(&auth(2, Role::SuperAdmin, None), 1, 9).is_ok());
    }
}
