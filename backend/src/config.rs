//! Runtime configuration, read from the environment.
//!
//! A `.env` file in the working directory is honored via `dotenvy`. Every
//! setting has a default, so the server starts with no environment at all.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// SQLite file holding boards, columns, cards and labels.
    pub database_path: PathBuf,
    /// Where uploaded workbooks wait for the worker.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Rows persisted per transaction before progress is reported.
    pub chunk_size: usize,
    /// How long finished jobs stay pollable.
    pub job_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_path: PathBuf::from("kanban.sqlite"),
            upload_dir: PathBuf::from("uploads/imports"),
            max_upload_bytes: 25 * 1024 * 1024,
            chunk_size: 200,
            job_retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let chunk_size = parse_or(&lookup, "IMPORT_CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            return Err("IMPORT_CHUNK_SIZE must be greater than zero".to_string());
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_upload_bytes: parse_or(&lookup, "IMPORT_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            chunk_size,
            job_retention: Duration::from_secs(parse_or(
                &lookup,
                "IMPORT_JOB_RETENTION_SECS",
                defaults.job_retention.as_secs(),
            )?),
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "IMPORT_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{} has an invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.job_retention, Duration::from_secs(3600));
    }

    #[test]
    fn overrides_are_parsed() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("IMPORT_CHUNK_SIZE", "50"),
            ("IMPORT_JOB_RETENTION_SECS", "10"),
            ("DATABASE_PATH", "/tmp/board.sqlite"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.job_retention, Duration::from_secs(10));
        assert_eq!(config.database_path, PathBuf::from("/tmp/board.sqlite"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = AppConfig::from_lookup(|k| (k == "PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(err.contains("PORT"));

        assert!(
            AppConfig::from_lookup(|k| (k == "IMPORT_CHUNK_SIZE").then(|| "0".to_string()))
                .is_err()
        );
    }
}
