use images_emulator::config::Config;
use images_emulator::startup;
use log::{error, info};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    info!(
        "Starting images emulator (storage: {}, signed URLs enforced: {})",
        config.storage_path.display(),
        config.enforce_signed_urls
    );

    let server = match startup::run(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {:#}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };
    server.await
}
