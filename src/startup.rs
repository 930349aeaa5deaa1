use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use log::info;

use crate::config::Config;
use crate::handlers::{init_routes, AppState};
use crate::store::{BlobStore, FilesystemBlobStore, MemoryStore, MongoStore, Store};

/// Builds shared state, picking MongoDB when a URI is configured.
pub async fn build_state(config: Config) -> Result<AppState> {
    tokio::fs::create_dir_all(&config.storage_path)
        .await
        .with_context(|| format!("creating storage root {}", config.storage_path.display()))?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(config.storage_path.clone()));

    let store: Arc<dyn Store> = match &config.mongodb_uri {
        Some(uri) => Arc::new(MongoStore::connect(uri, &config.mongodb_database).await?),
        None => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    Ok(AppState::new(store, blobs, config))
}

pub async fn run(config: Config) -> Result<actix_web::dev::Server> {
    let listen_addr = config.listen_addr.clone();
    let state = web::Data::new(build_state(config).await?);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .allow_any_header()
            .expose_headers(vec!["Content-Length", "Content-Type"])
            .max_age(300);

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(init_routes)
    })
    .bind(&listen_addr)
    .with_context(|| format!("binding {}", listen_addr))?
    .run();

    info!("Listening on http://{}", listen_addr);
    Ok(server)
}
