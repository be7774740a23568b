// src/config.rs

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct Config {
    /// Required by every command that touches Postgres.
    pub database_url: Option<String>,
    pub rust_log: String,
    pub bind_addr: String,
    pub dataset_dir: PathBuf,
    pub media_dir: PathBuf,
    pub log_dir: PathBuf,
    pub fetch_timeout_secs: u64,
    pub fetch_concurrency: usize,
    /// Preferred download height for multi-resolution images.
    /// `None` downloads the largest rendition.
    pub target_height: Option<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            rust_log: "info".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            dataset_dir: PathBuf::from("./json"),
            media_dir: PathBuf::from("./media"),
            log_dir: PathBuf::from("logs"),
            fetch_timeout_secs: 300,
            fetch_concurrency: 4,
            target_height: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, IngestError> {
        dotenv().ok();

        let defaults = Self::default();

        let fetch_timeout_secs = parse_var("FETCH_TIMEOUT_SECS")?.unwrap_or(defaults.fetch_timeout_secs);
        let fetch_concurrency = parse_var::<usize>("FETCH_CONCURRENCY")?
            .unwrap_or(defaults.fetch_concurrency)
            .max(1);

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            rust_log: env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            dataset_dir: env::var("DATASET_DIR").map(PathBuf::from).unwrap_or(defaults.dataset_dir),
            media_dir: env::var("MEDIA_DIR").map(PathBuf::from).unwrap_or(defaults.media_dir),
            log_dir: env::var("LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            fetch_timeout_secs,
            fetch_concurrency,
            target_height: parse_var("TARGET_HEIGHT")?,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, IngestError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| IngestError::Config("DATABASE_URL must be set".to_string()))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, IngestError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| IngestError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
