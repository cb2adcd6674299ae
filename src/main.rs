mod auth;
mod catalog;
mod entity;
mod error;
mod models;
mod routes;
mod settings;

use actix_web::{
    middleware::{Logger, NormalizePath, TrailingSlash},
    web::{route, Data},
    App, HttpServer,
};
use anyhow::Context;
use catalog::Catalog;
use entity::Entity;
use settings::Settings;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.logging.level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let entity = Entity::new(&settings)
        .await
        .context("failed to connect to database")?;
    entity.migrate().await.context("failed to run migrations")?;

    let expired = entity.subscription_sweep().await?;
    let completed = entity.booking_sweep().await?;
    tracing::info!(expired, completed, "startup sweep finished");

    let catalog = Catalog::new(&settings.catalog);
    let addr = settings.bind_addr();
    tracing::info!(%addr, "listening");

    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(entity.clone()))
            .app_data(Data::new(catalog.clone()))
            .wrap(NormalizePath::new(TrailingSlash::Always))
            .wrap(Logger::default())
            .configure(routes::config)
            .default_service(route().to(routes::fallback))
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
