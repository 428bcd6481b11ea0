//! Configuration management for the recommendation engine
//!
//! Provides strongly-typed configuration with validation, environment variable parsing,
//! and sensible defaults.
//!
//! # Example
//! ```no_run
//! use movie_recs::Config;
//! let config = Config::from_env().expect("failed to load config");
//! println!("API port: {}", config.api.port);
//! ```

use crate::error::{Error, Result};
use crate::recommendation::algorithm::Algorithm;
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// API server configuration
    pub api: ApiConfig,
    /// Recommendation batch configuration
    pub recommendation: RecommendationConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections to keep open
    pub min_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Idle timeout for connections
    pub idle_timeout: Duration,
    /// Maximum lifetime for connections
    pub max_lifetime: Duration,
    /// Enable statement caching
    pub statement_cache_size: usize,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Port to listen on
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Shared secret for the admin endpoints; unset disables the check
    pub admin_token: Option<String>,
    /// Port for the Prometheus exporter (only with the `metrics` feature)
    pub metrics_port: u16,
}

/// Recommendation batch configuration
#[derive(Debug, Clone)]
pub struct RecommendationConfig {
    /// top_n used when a request does not name one
    pub default_top_n: usize,
    /// Upper bound accepted for top_n
    pub max_top_n: usize,
    /// Watch window for the popularity ranking
    pub popularity_window_days: u32,
    /// How many favourite genres drive content candidates
    pub top_genres: usize,
    /// Rayon workers for collaborative scoring (0 = one per core)
    pub worker_threads: usize,
    /// In-flight per-user store lookups for content candidates
    pub content_concurrency: usize,
    /// Interval of the background batch scheduler; `None` disables it
    pub schedule_interval: Option<Duration>,
    /// Algorithm the scheduler runs
    pub scheduled_algorithm: Algorithm,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_top_n: 10,
            max_top_n: 100,
            popularity_window_days: 7,
            top_genres: 3,
            worker_threads: 0,
            content_concurrency: 10,
            schedule_interval: None,
            scheduled_algorithm: Algorithm::Hybrid,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Try to load .env file (ignore if not found)
        dotenvy::dotenv().ok();

        let config = Self {
            database: DatabaseConfig::from_env()?,
            api: ApiConfig::from_env()?,
            recommendation: RecommendationConfig::from_env()?,
        };

        config.validate()?;
        config.log_summary();

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections < self.database.min_connections {
            return Err(Error::InvalidConfig {
                key: "DB_MAX_CONNECTIONS",
                message: "max_connections must be >= min_connections".into(),
            });
        }

        self.recommendation.validate()
    }

    /// Log configuration summary (without sensitive data)
    fn log_summary(&self) {
        info!("Configuration loaded:");
        info!("  Database:");
        info!("    URL: {}", mask_url(&self.database.url));
        info!(
            "    Pool Size: {}-{}",
            self.database.min_connections, self.database.max_connections
        );
        info!("  API:");
        info!("    Listening on: {}:{}", self.api.host, self.api.port);
        info!("    Admin token: {}", if self.api.admin_token.is_some() { "set" } else { "not set" });
        info!("  Recommendations:");
        info!(
            "    top_n: default {}, max {}",
            self.recommendation.default_top_n, self.recommendation.max_top_n
        );
        info!(
            "    Popularity window: {} days",
            self.recommendation.popularity_window_days
        );
        match self.recommendation.schedule_interval {
            Some(interval) => info!(
                "    Scheduler: {} every {:?}",
                self.recommendation.scheduled_algorithm, interval
            ),
            None => info!("    Scheduler: disabled"),
        }
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = get_env("DATABASE_URL").unwrap_or_else(|_| {
            let user = std::env::var("USER").unwrap_or_else(|_| "postgres".to_string());
            format!("postgres://{}@localhost/movie_catalog", user)
        });

        Ok(Self {
            url,
            max_connections: get_env_or("DB_MAX_CONNECTIONS", "20").parse().unwrap_or(20),
            min_connections: get_env_or("DB_MIN_CONNECTIONS", "5").parse().unwrap_or(5),
            connect_timeout: Duration::from_secs(
                get_env_or("DB_CONNECT_TIMEOUT_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            ),
            idle_timeout: Duration::from_secs(
                get_env_or("DB_IDLE_TIMEOUT_SECS", "600")
                    .parse()
                    .unwrap_or(600),
            ),
            max_lifetime: Duration::from_secs(
                get_env_or("DB_MAX_LIFETIME_SECS", "3600")
                    .parse()
                    .unwrap_or(3600),
            ),
            statement_cache_size: get_env_or("DB_STATEMENT_CACHE_SIZE", "100")
                .parse()
                .unwrap_or(100),
        })
    }
}

impl ApiConfig {
    fn from_env() -> Result<Self> {
        let admin_token = get_env_or("ADMIN_TOKEN", "");

        Ok(Self {
            port: get_env_parsed_or("API_PORT", 8080)?,
            host: get_env_or("API_HOST", "0.0.0.0"),
            request_timeout: Duration::from_secs(
                get_env_or("API_REQUEST_TIMEOUT_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            ),
            cors_enabled: get_env_or("API_CORS_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            admin_token: if admin_token.is_empty() {
                None
            } else {
                Some(admin_token)
            },
            metrics_port: get_env_or("METRICS_PORT", "9000").parse().unwrap_or(9000),
        })
    }
}

impl RecommendationConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let schedule_secs: u64 = get_env_parsed_or("REC_SCHEDULE_INTERVAL_SECS", 0)?;
        let scheduled_algorithm = get_env_or(
            "REC_SCHEDULED_ALGORITHM",
            defaults.scheduled_algorithm.as_str(),
        )
        .parse::<Algorithm>()
        .map_err(|e| Error::InvalidConfig {
            key: "REC_SCHEDULED_ALGORITHM",
            message: e.to_string().into(),
        })?;

        Ok(Self {
            default_top_n: get_env_parsed_or("REC_DEFAULT_TOP_N", defaults.default_top_n)?,
            max_top_n: get_env_parsed_or("REC_MAX_TOP_N", defaults.max_top_n)?,
            popularity_window_days: get_env_parsed_or(
                "REC_POPULARITY_WINDOW_DAYS",
                defaults.popularity_window_days,
            )?,
            top_genres: get_env_parsed_or("REC_TOP_GENRES", defaults.top_genres)?,
            worker_threads: get_env_parsed_or("REC_WORKER_THREADS", defaults.worker_threads)?,
            content_concurrency: get_env_parsed_or(
                "REC_CONTENT_CONCURRENCY",
                defaults.content_concurrency,
            )?,
            schedule_interval: (schedule_secs > 0).then(|| Duration::from_secs(schedule_secs)),
            scheduled_algorithm,
        })
    }

    /// Validate recommendation settings
    pub fn validate(&self) -> Result<()> {
        if self.max_top_n == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_MAX_TOP_N",
                message: "max_top_n must be at least 1".into(),
            });
        }
        if self.default_top_n == 0 || self.default_top_n > self.max_top_n {
            return Err(Error::InvalidConfig {
                key: "REC_DEFAULT_TOP_N",
                message: format!("default_top_n must be between 1 and {}", self.max_top_n).into(),
            });
        }
        if self.popularity_window_days == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_POPULARITY_WINDOW_DAYS",
                message: "popularity window must be at least one day".into(),
            });
        }
        if self.top_genres == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_TOP_GENRES",
                message: "top_genres must be at least 1".into(),
            });
        }
        if self.content_concurrency == 0 {
            return Err(Error::InvalidConfig {
                key: "REC_CONTENT_CONCURRENCY",
                message: "content_concurrency must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Get required environment variable
fn get_env(key: &'static str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::MissingEnvVar { var: key })
}

/// Get environment variable with default
fn get_env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get and parse an optional environment variable; a present but unparsable value is an error
fn get_env_parsed_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|e: T::Err| Error::InvalidConfig {
            key,
            message: format!("Invalid value '{}': {}", value, e).into(),
        }),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive parts of URL
fn mask_url(url: &str) -> String {
    let userinfo_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    if let Some(at_pos) = url.rfind('@').filter(|&at| at >= userinfo_start) {
        if let Some(colon_pos) = url[userinfo_start..at_pos].find(':') {
            let colon_pos = userinfo_start + colon_pos;
            return format!("{}****{}", &url[..=colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
