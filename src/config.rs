use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::cache::BackendKind;
use crate::domain::parse_date;
use crate::error::GatorError;
use crate::transport::DEFAULT_TIMEOUT;

pub const CONFIG_FILE: &str = "gator.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub cached_services: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub min_age: Option<String>,
    #[serde(default)]
    pub max_age: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TransportSection {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub backend: BackendKind,
    pub cache_path: Utf8PathBuf,
    /// Whether `cache_path` came from the config file rather than the default.
    pub cache_path_configured: bool,
    pub min_age: Option<DateTime<Utc>>,
    pub max_age: Option<DateTime<Utc>>,
    pub max_concurrent: Option<usize>,
    pub timeout: Duration,
    pub cached_services: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GatorError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(GatorError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GatorError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GatorError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but a missing `gator.json` in the
    /// current directory yields the defaults.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, GatorError> {
        match Self::resolve(path) {
            Err(GatorError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GatorError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let backend = config.cache.backend.unwrap_or_default();

        let cache_path_configured = config.cache.path.is_some();
        let cache_path = match config.cache.path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_cache_path(backend)?,
        };

        let min_age = config.cache.min_age.as_deref().map(parse_date).transpose()?;
        let max_age = config.cache.max_age.as_deref().map(parse_date).transpose()?;

        let timeout = config
            .transport
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(ResolvedConfig {
            schema_version,
            backend,
            cache_path,
            cache_path_configured,
            min_age,
            max_age,
            max_concurrent: config.scheduler.max_concurrent.filter(|max| *max > 0),
            timeout,
            cached_services: config.cached_services,
        })
    }
}

impl ResolvedConfig {
    /// Switches the cache backend. A configured cache path is kept; a default
    /// one follows the new backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Result<Self, GatorError> {
        if backend != self.backend && !self.cache_path_configured {
            self.cache_path = default_cache_path(backend)?;
        }
        self.backend = backend;
        Ok(self)
    }
}

pub fn default_cache_root() -> Result<Utf8PathBuf, GatorError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("mascp-gator")).ok()
        })
        .ok_or_else(|| GatorError::Filesystem("unable to resolve cache directory".to_string()))
}

pub fn default_cache_path(backend: BackendKind) -> Result<Utf8PathBuf, GatorError> {
    let root = default_cache_root()?;
    Ok(match backend {
        BackendKind::Keyvalue => root.join("kv"),
        _ => root.join("datacache.sqlite"),
    })
}
