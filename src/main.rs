// src/main.rs

mod app_state;
mod auth;
mod config;
mod db;
mod error;
mod memory_store;
mod middleware;
mod models;
mod routes;
mod rules;
mod store;
mod task_management;
mod task_service;
mod team_management;
mod team_service;
mod upload;

#[cfg(test)]
mod test_support;

use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};

use crate::app_state::AppState;
use crate::config::{Config, StoreBackend};
use crate::memory_store::MemoryStore;
use crate::middleware::Authentication;
use crate::store::Store;
use crate::upload::LocalMediaStore;

async fn open_store(config: &Config) -> io::Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Mongo => {
            let uri = config.mongo_uri.as_deref().unwrap_or_default();
            let mongodb = db::MongoDB::init(uri, &config.database_name)
                .await
                .map_err(io::Error::other)?;
            let store = db::MongoStore::new(&mongodb);
            store.ensure_indexes().await.map_err(io::Error::other)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let store = open_store(&config).await?;
    let media = Arc::new(LocalMediaStore::new(
        config.upload_dir.clone(),
        &config.public_base_url,
    ));
    let state = web::Data::new(AppState {
        store,
        media,
        config: config.clone(),
    });

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS Origin: {}", config.frontend_origin);

    let frontend_origin = config.frontend_origin.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Authentication)
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
