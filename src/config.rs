use std::env;
use std::path::PathBuf;

use log::warn;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_STORAGE_PATH: &str = "./data/images";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_IMAGE_ALLOWANCE: u64 = 100_000;
pub const DEFAULT_MONGODB_DATABASE: &str = "images";

/// Runtime settings, read from `DT_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// Empty accepts any credential
    pub auth_token: String,
    pub base_url: String,
    pub enforce_signed_urls: bool,
    pub image_allowance: u64,
    /// Unset selects the in-memory store
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            auth_token: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            enforce_signed_urls: false,
            image_allowance: DEFAULT_IMAGE_ALLOWANCE,
            mongodb_uri: None,
            mongodb_database: DEFAULT_MONGODB_DATABASE.to_string(),
        }
    }
}

impl Config {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let image_allowance = match get("DT_IMAGE_ALLOWANCE") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Ignoring invalid DT_IMAGE_ALLOWANCE {:?}", raw);
                defaults.image_allowance
            }),
            None => defaults.image_allowance,
        };

        Self {
            listen_addr: get("DT_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            storage_path: get("DT_STORAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_path),
            auth_token: get("DT_AUTH_TOKEN").unwrap_or_default(),
            base_url: get("DT_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            enforce_signed_urls: get("DT_ENFORCE_SIGNED_URLS").as_deref() == Some("true"),
            image_allowance,
            mongodb_uri: get("DT_MONGODB_URI"),
            mongodb_database: get("DT_MONGODB_DATABASE").unwrap_or(defaults.mongodb_database),
        }
    }
}
