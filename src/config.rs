use serde::{Deserialize, Serialize};
use std::env;

/// Backend selected when `STORAGE_TYPE` is unset.
pub const DEFAULT_STORAGE_BACKEND: &str = "postgres";
/// Per-subscriber broadcast channel capacity when `PUBSUB_BUFFER_SIZE` is unset.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selector: "postgres" or "memory".
    pub backend: String,
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub channel_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            storage: StorageConfig {
                backend: env::var("STORAGE_TYPE")
                    .unwrap_or_else(|_| DEFAULT_STORAGE_BACKEND.to_string()),
                database_url: env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .unwrap_or(20),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
            },
            broadcast: BroadcastConfig {
                channel_capacity: env::var("PUBSUB_BUFFER_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.storage.backend == "postgres" && self.storage.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL is required when STORAGE_TYPE is postgres");
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            storage: StorageConfig {
                backend: "memory".to_string(),
                database_url: String::new(),
                max_connections: 20,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broadcast: BroadcastConfig {
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
        }
    }

    #[test]
    fn test_memory_backend_needs_no_dsn() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_dsn() {
        let mut config = base_config();
        config.storage.backend = "postgres".to_string();
        assert!(config.validate().is_err());

        config.storage.database_url = "postgres://localhost/comments".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_address() {
        let config = base_config();
        assert_eq!(config.server_address(), "127.0.0.1:8080");
    }
}
