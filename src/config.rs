use std::env;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub mongo_uri: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub bind_addr: String,
    pub frontend_origin: String,
    pub upload_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongo" | "mongodb" => StoreBackend::Mongo,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let mongo_uri = env::var("MONGO_URI").ok();
        if store_backend == StoreBackend::Mongo && mongo_uri.is_none() {
            return Err(ConfigError::Missing("MONGO_URI"));
        }

        let bcrypt_cost = parse_var("BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        Ok(Self {
            store_backend,
            mongo_uri,
            database_name: env::var("DATABASE_NAME").unwrap_or_else(|_| "taskline".to_string()),
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            jwt_ttl_hours: parse_var("JWT_TTL_HOURS", 24)?,
            bcrypt_cost,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Settings for in-process tests: memory store, cheap hashing.
    pub fn for_tests(upload_dir: PathBuf) -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            mongo_uri: None,
            database_name: "taskline_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_hours: 1,
            bcrypt_cost: 4,
            bind_addr: "127.0.0.1:0".to_string(),
            frontend_origin: "http://localhost:3000".to_string(),
            upload_dir,
            public_base_url: "http://localhost:8080".to_string(),
            max_upload_bytes: 1024,
        }
    }
}
