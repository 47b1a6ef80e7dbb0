use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8787";

/// Hard ceiling on one engine run. Matches the hosted request budget.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 800;

/// Number of completed sessions returned by the history endpoint.
pub const HISTORY_LIMIT: i64 = 20;

/// Template used to turn a legacy bare slug into a Polymarket URL.
pub const POLYMARKET_EVENT_URL_PREFIX: &str = "https://polymarket.com/event/";

/// Identity substituted for anonymous callers in self-hosted mode.
pub const DEV_USER_ID: &str = "dev-user-00000000-0000-0000-0000-000000000000";
pub const DEV_USER_EMAIL: &str = "dev@localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Single-tenant: anonymous callers run as the development identity.
    SelfHosted,
    /// Multi-tenant: every request needs an identity and an access token.
    Hosted,
}

impl AppMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "self-hosted" | "self_hosted" | "local" => Ok(AppMode::SelfHosted),
            "hosted" | "valyu" => Ok(AppMode::Hosted),
            other => Err(AppError::Config(format!(
                "APP_MODE must be 'self-hosted' or 'hosted', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for AppMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppMode::SelfHosted => write!(f, "self-hosted"),
            AppMode::Hosted => write!(f, "hosted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Postgres,
    Memory,
}

impl StoreBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be one of sqlite, postgres, memory; got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub api_port: u16,
    pub mode: AppMode,
    pub store_backend: StoreBackend,
    /// SQLite file path (DB_PATH)
    pub db_path: String,
    /// PostgreSQL connection string (DATABASE_URL), required for the postgres backend
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Base URL of the forecast engine service (ENGINE_URL)
    pub engine_url: String,
    /// Service credential used when a request carries no access token (ENGINE_API_KEY)
    pub engine_api_key: Option<String>,
    pub engine_timeout: Duration,
    /// Cancel the engine run when the client drops the stream (CANCEL_ON_DISCONNECT)
    pub cancel_on_disconnect: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let store_backend =
            StoreBackend::parse(&std::env::var("STORE_BACKEND").unwrap_or_else(|_| "sqlite".to_string()))?;
        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config(
                "DATABASE_URL is required when STORE_BACKEND=postgres".to_string(),
            ));
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            mode: AppMode::parse(&std::env::var("APP_MODE").unwrap_or_else(|_| "self-hosted".to_string()))?,
            store_backend,
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| ".local-data/forecaster.db".to_string()),
            database_url,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u32>()
                .unwrap_or(10),
            engine_url: std::env::var("ENGINE_URL").unwrap_or_else(|_| DEFAULT_ENGINE_URL.to_string()),
            engine_api_key: std::env::var("ENGINE_API_KEY").ok().filter(|s| !s.is_empty()),
            engine_timeout: Duration::from_secs(
                std::env::var("ENGINE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| DEFAULT_ENGINE_TIMEOUT_SECS.to_string())
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| AppError::Config("ENGINE_TIMEOUT_SECS must be a positive whole number".to_string()))?,
            ),
            cancel_on_disconnect: parse_bool(
                &std::env::var("CANCEL_ON_DISCONNECT").unwrap_or_else(|_| "true".to_string()),
            )
            .ok_or_else(|| AppError::Config("CANCEL_ON_DISCONNECT must be true or false".to_string()))?,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_mode_accepts_aliases() {
        assert_eq!(AppMode::parse("self-hosted").unwrap(), AppMode::SelfHosted);
        assert_eq!(AppMode::parse("VALYU").unwrap(), AppMode::Hosted);
        assert!(AppMode::parse("cloud").is_err());
    }

    #[test]
    fn store_backend_rejects_unknown() {
        assert_eq!(StoreBackend::parse("postgresql").unwrap(), StoreBackend::Postgres);
        assert!(matches!(StoreBackend::parse("mysql"), Err(AppError::Config(_))));
    }

    #[test]
    fn parse_bool_is_strict() {
        assert_eq!(parse_bool("On"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
