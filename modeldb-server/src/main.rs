use actix_web::{web, App, HttpServer};
use modeldb::{ConnectionManager, DbConfig, DbServiceFactory};
use std::path::PathBuf;
use std::sync::Arc;

mod handlers;

/// Shared application state
pub struct AppState {
    pub factory: DbServiceFactory,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("Starting ModelDB server");

    let host = std::env::var("MODELDB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("MODELDB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let schema_file = std::env::var("MODELDB_SCHEMA").ok().map(PathBuf::from);

    let config = DbConfig::from_env();
    let mut builder = DbServiceFactory::builder().with_user_schema();
    if let Some(path) = &schema_file {
        log::info!("Loading schemas from: {}", path.display());
        builder = builder.schema_file(path).map_err(std::io::Error::other)?;
    }
    let factory = builder
        .build(Arc::new(ConnectionManager::sqlite(config)))
        .map_err(std::io::Error::other)?;

    factory.initialize(None).await.map_err(std::io::Error::other)?;
    log::info!("Registered models: {}", factory.model_names().join(", "));

    let state = web::Data::new(AppState { factory });

    log::info!("Listening on {host}:{port}");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(1 << 20))
            .configure(handlers::configure)
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
