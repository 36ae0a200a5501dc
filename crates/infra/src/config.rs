//! Process configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dotenvy::dotenv;

use rbac_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

/// Application configuration.
#[derive(Clone)]
pub struct Settings {
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub admin_username: String,
    pub admin_password: String,
    pub http_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    /// Extra permission required for administrative operations, if any.
    pub admin_permission: Option<String>,
    pub store_timeout: Duration,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load configuration from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let token_ttl_secs: u64 = var("TOKEN_TTL_SECS")
            .unwrap_or_else(|| "7200".to_string())
            .parse()
            .context("TOKEN_TTL_SECS must be a whole number of seconds")?;
        if token_ttl_secs == 0 {
            bail!("TOKEN_TTL_SECS must be positive");
        }

        let store_timeout_ms: u64 = var("STORE_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .context("STORE_TIMEOUT_MS must be a whole number of milliseconds")?;

        Ok(Self {
            database_url: var("DATABASE_URL"),
            jwt_secret,
            token_ttl: Duration::from_secs(token_ttl_secs),
            admin_username: var("ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            admin_password: var("ADMIN_PASSWORD").unwrap_or_else(|| "123456".to_string()),
            http_addr: var("HTTP_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string())
                .parse()
                .context("HTTP_ADDR must be a socket address")?,
            rpc_addr: var("RPC_ADDR")
                .unwrap_or_else(|| "127.0.0.1:50051".to_string())
                .parse()
                .context("RPC_ADDR must be a socket address")?,
            admin_permission: var("ADMIN_PERMISSION"),
            store_timeout: Duration::from_millis(store_timeout_ms),
            log_format: var("LOG_FORMAT")
                .map(|v| v.parse())
                .transpose()
                .context("LOG_FORMAT must be 'json' or 'pretty'")?
                .unwrap_or_default(),
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

impl core::fmt::Debug for Settings {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Settings")
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("token_ttl", &self.token_ttl)
            .field("admin_username", &self.admin_username)
            .field("http_addr", &self.http_addr)
            .field("rpc_addr", &self.rpc_addr)
            .field("admin_permission", &self.admin_permission)
            .field("store_timeout", &self.store_timeout)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}
