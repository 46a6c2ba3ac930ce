use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use store_sqlite::SqliteStore;

pub const DB_ENV: &str = "SLACK_DB";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: None,
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

impl Config {
    pub fn path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("slack-archive").join("config.toml")
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }

    /// `--db`, then `$SLACK_DB`, then the config file, then the data dir.
    pub fn database_path(&self, flag: Option<PathBuf>) -> PathBuf {
        self.resolve_database(flag, std::env::var_os(DB_ENV))
    }

    fn resolve_database(&self, flag: Option<PathBuf>, env: Option<OsString>) -> PathBuf {
        flag.or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(|| self.database.clone())
            .unwrap_or_else(SqliteStore::default_path)
    }

    pub fn bind(&self, flag: Option<String>) -> String {
        flag.unwrap_or_else(|| self.server.bind.clone())
    }

    pub fn static_dir(&self, flag: Option<PathBuf>) -> Option<PathBuf> {
        flag.or_else(|| self.server.static_dir.clone())
    }
}
