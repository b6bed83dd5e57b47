/// Configuration management for social-feed-service
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loaders::DEFAULT_MAX_BATCH_SIZE;
use crate::services::feed::DEFAULT_MAX_LIMIT;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub vote: VoteConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    /// HTTP port
    pub http_port: u16,
    /// Emit JSON log lines
    pub json_logs: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Feed and loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Hard cap on posts per page
    pub max_limit: i64,
    /// Cap on keys per loader bulk fetch
    pub loader_max_batch_size: usize,
}

/// Vote engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteConfig {
    /// Upper bound on one vote transaction
    pub store_timeout_ms: u64,
    /// Read-only demo account
    pub demo_user_id: Option<Uuid>,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: env_or("PORT", 8086),
            json_logs: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: env_or("DB_MAX_CONNECTIONS", default_max_connections()),
            min_connections: env_or("DB_MIN_CONNECTIONS", default_min_connections()),
            acquire_timeout_secs: env_or(
                "DB_ACQUIRE_TIMEOUT_SECS",
                default_acquire_timeout_secs(),
            ),
        };

        let feed = FeedConfig {
            max_limit: env_or("FEED_MAX_LIMIT", DEFAULT_MAX_LIMIT),
            loader_max_batch_size: env_or("LOADER_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE),
        };

        let demo_user_id = match std::env::var("DEMO_USER_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                Uuid::parse_str(raw.trim()).context("DEMO_USER_ID must be a UUID")?,
            ),
            _ => None,
        };

        let vote = VoteConfig {
            store_timeout_ms: env_or("VOTE_STORE_TIMEOUT_MS", 5000),
            demo_user_id,
        };

        Ok(Config {
            app,
            database,
            feed,
            vote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "PORT",
        "FEED_MAX_LIMIT",
        "VOTE_STORE_TIMEOUT_MS",
        "DEMO_USER_ID",
        "LOG_FORMAT",
    ];

    fn clear() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_default_values() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.app.http_port, 8086);
        assert!(!config.app.json_logs);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.database.min_connections, 5);
        assert_eq!(config.feed.max_limit, 50);
        assert_eq!(config.feed.loader_max_batch_size, 100);
        assert_eq!(config.vote.store_timeout_ms, 5000);
        assert_eq!(config.vote.demo_user_id, None);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        let demo = Uuid::new_v4();
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("FEED_MAX_LIMIT", "20");
        std::env::set_var("DEMO_USER_ID", demo.to_string());
        std::env::set_var("LOG_FORMAT", "JSON");

        let config = Config::from_env().unwrap();
        assert_eq!(config.feed.max_limit, 20);
        assert_eq!(config.vote.demo_user_id, Some(demo));
        assert!(config.app.json_logs);
        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_demo_user_rejected() {
        clear();
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("DEMO_USER_ID", "not-a-uuid");

        assert!(Config::from_env().is_err());
        clear();
    }
}
