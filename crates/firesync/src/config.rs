//! CLI-owned configuration: TOML file, environment, and translation to
//! `firesync_core::CacheConfig` / `firesync_api::TransportConfig`.
//!
//! Core never sees these types -- it receives a pre-built `CacheConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use firesync_api::TransportConfig;
use firesync_core::CacheConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── TOML config structs ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSection,

    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendSection {
    /// Base URL of the rules backend (e.g. "http://localhost:3000").
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout(),
            insecure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_keep_unused")]
    pub keep_unused_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_true")]
    pub refetch_on_focus: bool,

    #[serde(default = "default_true")]
    pub refetch_on_reconnect: bool,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            keep_unused_secs: default_keep_unused(),
            sweep_interval_secs: default_sweep_interval(),
            refetch_on_focus: true,
            refetch_on_reconnect: true,
            debounce_ms: default_debounce(),
        }
    }
}

fn default_url() -> String {
    "http://localhost:3000".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_keep_unused() -> u64 {
    60
}
fn default_sweep_interval() -> u64 {
    5
}
fn default_debounce() -> u64 {
    350
}
fn default_true() -> bool {
    true
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            keep_unused_for: Duration::from_secs(self.keep_unused_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            refetch_on_focus: self.refetch_on_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

// ── Config file path ─────────────────────────────────────────────────

/// Resolve the config file path: `--config` flag, else platform conventions.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    if let Some(ref path) = global.config {
        return path.clone();
    }
    ProjectDirs::from("dev", "firesync", "firesync")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        })
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("firesync");
    p
}

// ── Config loading ───────────────────────────────────────────────────

/// Load the config: defaults, then the TOML file, then `FIRESYNC_*`
/// environment variables (`FIRESYNC_BACKEND__URL`, `FIRESYNC_CACHE__DEBOUNCE_MS`).
pub fn load_config(path: &Path) -> Result<Config, CliError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FIRESYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Apply command-line overrides on top of the loaded file.
pub fn resolve(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut config = load_config(&config_path(global))?;

    if let Some(ref url) = global.url {
        config.backend.url.clone_from(url);
    }
    if let Some(timeout) = global.timeout {
        config.backend.timeout_secs = timeout;
    }
    config.backend.insecure |= global.insecure;

    url::Url::parse(&config.backend.url).map_err(|e| CliError::Validation {
        field: "url".into(),
        reason: format!("{e}: {}", config.backend.url),
    })?;

    Ok(config)
}

impl BackendSection {
    pub fn to_transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            accept_invalid_certs: self.insecure,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_core_defaults() {
        assert_eq!(
            CacheSection::default().to_cache_config(),
            CacheConfig::default()
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[backend]\nurl = \"https://rules.internal\"\n\n[cache]\ndebounce_ms = 100\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.backend.url, "https://rules.internal");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(
            config.cache.to_cache_config().debounce,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
