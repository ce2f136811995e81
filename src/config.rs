//! Runtime configuration read from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `CLIENTELE_PORT` | `3000` |
//! | `CLIENTELE_DATABASE_URL` | `sqlite:clientele.db?mode=rwc` |
//! | `CLIENTELE_MAX_BATCH_WRITES` | `500` |
//!
//! Unparseable values fall back to the default.

use std::env;

use crate::storage::{DEFAULT_MAX_BATCH_WRITES, StorageConfig};

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:clientele.db?mode=rwc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("CLIENTELE_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_url =
            lookup("CLIENTELE_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let max_batch_writes = lookup("CLIENTELE_MAX_BATCH_WRITES")
            .and_then(|n| n.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_BATCH_WRITES);

        Self {
            port,
            database_url,
            storage: StorageConfig { max_batch_writes },
        }
    }
}
