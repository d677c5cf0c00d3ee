use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub session_idle_minutes: i64,
    pub session_secret: Option<String>,
    pub session_issuer: String,
    pub notifier_capacity: usize,
    pub message_page_limit: u32,
    pub cors_origin: Option<String>,
}

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,townsquare=debug";

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            database_url: try_load(&lookup, "DATABASE_URL", "sqlite://townsquare.db")?,
            bind_addr: try_load(&lookup, "BIND_ADDR", "0.0.0.0:8080")?,
            db_max_connections: try_load(&lookup, "DB_MAX_CONNECTIONS", "16")?,
            session_idle_minutes: try_load(&lookup, "SESSION_IDLE_MINUTES", "5")?,
            session_secret: lookup("SESSION_SECRET").filter(|secret| !secret.is_empty()),
            session_issuer: try_load(&lookup, "SESSION_ISSUER", "townsquare")?,
            notifier_capacity: try_load(&lookup, "NOTIFIER_CAPACITY", "256")?,
            message_page_limit: try_load(&lookup, "MESSAGE_PAGE_LIMIT", "200")?,
            cors_origin: lookup("CORS_ORIGIN").filter(|origin| !origin.is_empty()),
        })
    }

    /// Idle window shared by the cookie session and the chat session registry.
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_minutes.max(0) as u64 * 60)
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_owned()
    });
    raw.parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("invalid {key} value {raw:?}"))
}
