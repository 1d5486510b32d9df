//! Configuration module for the lead pipeline service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Search credits granted to a user the first time their quota is read
    pub default_search_quota: i64,
    /// Enrichment credits granted to a user the first time their quota is read
    pub default_enrich_quota: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("PIPELINE_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("PIPELINE_DB_PATH")
            .unwrap_or_else(|_| "./data/pipeline.sqlite".to_string())
            .into();

        let index_path = env::var("PIPELINE_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr = parse_var("PIPELINE_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = env::var("PIPELINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_search_quota = parse_var("PIPELINE_SEARCH_QUOTA", "25")?;
        let default_enrich_quota = parse_var("PIPELINE_ENRICH_QUOTA", "10")?;

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            default_search_quota,
            default_enrich_quota,
        })
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, AppError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {} value: {}", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 7] = [
        "PIPELINE_API_PSK",
        "PIPELINE_DB_PATH",
        "PIPELINE_INDEX_PATH",
        "PIPELINE_BIND_ADDR",
        "PIPELINE_LOG_LEVEL",
        "PIPELINE_SEARCH_QUOTA",
        "PIPELINE_ENRICH_QUOTA",
    ];

    // Both cases run in one test: the process environment is shared between
    // test threads.
    #[test]
    fn test_config_from_env() {
        for var in VARS {
            env::remove_var(var);
        }

        let config = Config::from_env().unwrap();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/pipeline.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.default_search_quota, 25);
        assert_eq!(config.default_enrich_quota, 10);

        env::set_var("PIPELINE_SEARCH_QUOTA", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        env::remove_var("PIPELINE_SEARCH_QUOTA");
    }
}
