use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::inference::StrategyKind;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Inference engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a loaded symptom list is served before it is reloaded.
    pub symptom_cache_ttl: Duration,
    /// Strategy the diagnosis service starts with.
    pub default_strategy: StrategyKind,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/medidiagnose.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let default_strategy = match env::var("INFERENCE_STRATEGY") {
            Ok(raw) => raw
                .parse::<StrategyKind>()
                .map_err(|message| ConfigError::Invalid { message })?,
            Err(_) => StrategyKind::ForwardChaining,
        };

        let engine = EngineConfig {
            symptom_cache_ttl: Duration::from_secs(
                env::var("SYMPTOM_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            default_strategy,
        };

        Ok(Config {
            database,
            logging,
            engine,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symptom_cache_ttl: Duration::from_secs(300),
            default_strategy: StrategyKind::ForwardChaining,
        }
    }
}
