use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cache::default_cache_dir;
use crate::resolver::github::DEFAULT_API_URL;
use crate::resolver::pypi::DEFAULT_REGISTRY_URL;
use crate::scheduler::DEFAULT_MAX_CONCURRENCY;

/// Environment variable consulted when no source-host token is configured.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Root configuration structure, deserialized from `.license-waterfall/config.toml`.
///
/// Every section and key is optional; missing values take the defaults below.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub resolver: ResolverConfig,
    pub source_host: SourceHostConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding `cache.db`. `~` is expanded.
    pub dir: Option<PathBuf>,
    pub ttl_days: u64,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_days: 30,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(default_cache_dir)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_concurrency: usize,
    /// Overall batch deadline in seconds; `0` disables it.
    pub deadline_secs: u64,
    pub registry_url: String,
    pub source_host_api_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline_secs: 300,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            source_host_api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ResolverConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SourceHostConfig {
    pub token: Option<String>,
    pub max_attempts: u32,
}

impl Default for SourceHostConfig {
    fn default() -> Self {
        Self {
            token: None,
            max_attempts: 3,
        }
    }
}

impl SourceHostConfig {
    /// Configured token, else the `GITHUB_TOKEN` environment variable.
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`, the path passed via `--config`
/// 2. `<project_path>/.license-waterfall/config.toml`
/// 3. `~/.config/license-waterfall/config.toml`
/// 4. Built-in [`Config::default`]
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".license-waterfall").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(".config")
            .join("license-waterfall")
            .join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
