//! HTTP server and database binding configuration.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ServerEnvConfig {
    pub database_url: String,
    pub bind_address: String,
    pub port: u16,
    /// Shared secret the out-of-scope auth layer presents on admin routes.
    pub admin_api_token: String,
}

impl ServerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("Failed to parse PORT = {:?}", raw))?,
            Err(_) => 8000,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/atelier.db".to_string()),
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            admin_api_token: env::var("ADMIN_API_TOKEN").unwrap_or_default(),
        })
    }
}
