pub mod auth;
pub mod config;
pub mod error;
pub mod fit;
pub mod format;
pub mod handlers;
pub mod image_processor;
pub mod model;
pub mod pagination;
pub mod signing;
pub mod startup;
pub mod store;
pub mod upload;

pub use handlers::*;
pub use startup::*;

use actix_web::web;

/// Registers every route with in-memory records and blobs under `config.storage_path`.
pub fn init_services(config: config::Config) -> impl FnOnce(&mut web::ServiceConfig) {
    let state = web::Data::new(AppState::in_memory(config));
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(state).configure(init_routes);
    }
}
