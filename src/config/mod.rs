use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const SECS_PER_DAY: u64 = 24 * 3600;
// cookie Max-Age 以 i64 秒表示
const MAX_GUEST_SESSION_DAYS: u64 = i64::MAX as u64 / SECS_PER_DAY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    File,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StorageBackend::Postgres),
            "file" | "json" => Ok(StorageBackend::File),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub storage_backend: StorageBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub ollama_url: String,
    pub model_name: String,
    pub model_timeout_secs: u64,
    pub guest_session_days: u64,
    pub bcrypt_cost: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// 从任意键值来源解析配置，缺省值与 `.env.example` 一致
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage_backend = match get("STORAGE_BACKEND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                var: "STORAGE_BACKEND",
                value,
            })?,
            None => StorageBackend::Postgres,
        };

        let database_url = get("DATABASE_URL");
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let bcrypt_cost = parse_or(&get, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                var: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let guest_session_days = parse_or(&get, "GUEST_SESSION_DAYS", 30)?;
        if guest_session_days > MAX_GUEST_SESSION_DAYS {
            return Err(ConfigError::Invalid {
                var: "GUEST_SESSION_DAYS",
                value: guest_session_days.to_string(),
            });
        }

        Ok(Config {
            server_host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: parse_or(&get, "SERVER_PORT", 3000)?,
            storage_backend,
            database_url,
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            data_dir: get("DATA_DIR").unwrap_or_else(|| "data".into()).into(),
            static_dir: get("STATIC_DIR").unwrap_or_else(|| "public".into()).into(),
            ollama_url: get("OLLAMA_URL")
                .unwrap_or_else(|| "http://localhost:11434".into())
                .trim_end_matches('/')
                .to_string(),
            model_name: get("MODEL_NAME").unwrap_or_else(|| "deepseek-r1:1.5b".into()),
            model_timeout_secs: parse_or(&get, "MODEL_TIMEOUT_SECS", 120)?,
            guest_session_days,
            bcrypt_cost,
        })
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn guest_session_lifetime(&self) -> Duration {
        Duration::from_secs(self.guest_session_days.saturating_mul(SECS_PER_DAY))
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}
