//! Runtime configuration.
//!
//! Each value is resolved in order: command-line flag, environment variable,
//! persisted `local_settings` row, built-in default. The data directory is
//! the exception: it locates the settings table, so it never comes from it.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::api::normalize_api_url;
use crate::db::LocalStore;
use crate::error::{AppError, AppResult};
use crate::ingest::ParseMode;
use crate::request_cache::{DEFAULT_CACHE_VERSION, DEFAULT_TIMEOUT};

pub const ENV_DATA_DIR: &str = "BARCODE_INVENTORY_DATA_DIR";
pub const ENV_API_URL: &str = "BARCODE_INVENTORY_API_URL";
pub const ENV_PARSE_MODE: &str = "BARCODE_INVENTORY_PARSE_MODE";
pub const ENV_CACHE_VERSION: &str = "BARCODE_INVENTORY_CACHE_VERSION";
pub const ENV_HTTP_TIMEOUT: &str = "BARCODE_INVENTORY_HTTP_TIMEOUT_SECS";

/// `(category, key)` pairs of persisted settings.
pub const SETTING_API_URL: (&str, &str) = ("remote", "api_url");
pub const SETTING_HTTP_TIMEOUT: (&str, &str) = ("remote", "http_timeout_secs");
pub const SETTING_PARSE_MODE: (&str, &str) = ("ingest", "parse_mode");
pub const SETTING_DEFAULT_FILE: (&str, &str) = ("ingest", "default_file");
pub const SETTING_CACHE_VERSION: (&str, &str) = ("cache", "version");

const APP_DIR_NAME: &str = "barcode-inventory";

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub api_url: Option<String>,
    pub parse_mode: Option<ParseMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Normalised backend URL; `None` selects Local mode.
    pub api_url: Option<String>,
    pub parse_mode: ParseMode,
    pub cache_version: String,
    pub http_timeout: Duration,
    pub default_file: Option<PathBuf>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn setting_value(store: &LocalStore, (category, key): (&str, &str)) -> Option<String> {
    store
        .get_setting(category, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Data directory: flag, then environment, then the platform data dir.
pub fn resolve_data_dir(cli: Option<&Path>) -> PathBuf {
    if let Some(dir) = cli {
        return dir.to_path_buf();
    }
    if let Some(dir) = env_value(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

impl AppConfig {
    pub fn resolve(overrides: &ConfigOverrides, store: &LocalStore) -> AppResult<Self> {
        let data_dir = resolve_data_dir(overrides.data_dir.as_deref());

        let api_url = overrides
            .api_url
            .clone()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| env_value(ENV_API_URL))
            .or_else(|| setting_value(store, SETTING_API_URL))
            .map(|url| normalize_api_url(&url));

        let parse_mode = match overrides.parse_mode {
            Some(mode) => mode,
            None => match env_value(ENV_PARSE_MODE).or_else(|| setting_value(store, SETTING_PARSE_MODE)) {
                Some(raw) => raw.parse().map_err(AppError::InvalidInput)?,
                None => ParseMode::default(),
            },
        };

        let cache_version = env_value(ENV_CACHE_VERSION)
            .or_else(|| setting_value(store, SETTING_CACHE_VERSION))
            .unwrap_or_else(|| DEFAULT_CACHE_VERSION.to_string());

        let http_timeout = match env_value(ENV_HTTP_TIMEOUT).or_else(|| setting_value(store, SETTING_HTTP_TIMEOUT)) {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    AppError::InvalidInput(format!("HTTP timeout must be whole seconds, got {raw}"))
                })?;
                Duration::from_secs(secs.max(1))
            }
            None => DEFAULT_TIMEOUT,
        };

        let default_file = setting_value(store, SETTING_DEFAULT_FILE).map(PathBuf::from);

        let config = Self {
            data_dir,
            api_url,
            parse_mode,
            cache_version,
            http_timeout,
            default_file,
        };
        debug!(?config, "Configuration resolved");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            ENV_DATA_DIR,
            ENV_API_URL,
            ENV_PARSE_MODE,
            ENV_CACHE_VERSION,
            ENV_HTTP_TIMEOUT,
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let store = LocalStore::open_in_memory().unwrap();
        let config = AppConfig::resolve(&ConfigOverrides::default(), &store).unwrap();

        assert!(config.api_url.is_none());
        assert_eq!(config.parse_mode, ParseMode::Heuristic);
        assert_eq!(config.cache_version, DEFAULT_CACHE_VERSION);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.default_file.is_none());
        assert!(config.data_dir.ends_with(APP_DIR_NAME));
    }

    #[test]
    #[serial]
    fn test_flag_beats_env_beats_setting() {
        clear_env();
        let store = LocalStore::open_in_memory().unwrap();
        store.set_setting("remote", "api_url", "settings-host:8001").unwrap();
        store.set_setting("ingest", "parse_mode", "strict").unwrap();

        let from_settings = AppConfig::resolve(&ConfigOverrides::default(), &store).unwrap();
        assert_eq!(from_settings.api_url.as_deref(), Some("https://settings-host:8001/api"));
        assert_eq!(from_settings.parse_mode, ParseMode::Strict);

        std::env::set_var(ENV_API_URL, "localhost:9000");
        let from_env = AppConfig::resolve(&ConfigOverrides::default(), &store).unwrap();
        assert_eq!(from_env.api_url.as_deref(), Some("http://localhost:9000/api"));

        let overrides = ConfigOverrides {
            api_url: Some("http://cli-host/api/".into()),
            parse_mode: Some(ParseMode::Heuristic),
            ..ConfigOverrides::default()
        };
        let from_cli = AppConfig::resolve(&overrides, &store).unwrap();
        assert_eq!(from_cli.api_url.as_deref(), Some("http://cli-host/api"));
        assert_eq!(from_cli.parse_mode, ParseMode::Heuristic);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_blank_setting_means_local_mode() {
        clear_env();
        let store = LocalStore::open_in_memory().unwrap();
        store.set_setting("remote", "api_url", "   ").unwrap();
        let config = AppConfig::resolve(&ConfigOverrides::default(), &store).unwrap();
        assert!(config.api_url.is_none());
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        let store = LocalStore::open_in_memory().unwrap();

        std::env::set_var(ENV_PARSE_MODE, "guess");
        let err = AppConfig::resolve(&ConfigOverrides::default(), &store).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
        std::env::remove_var(ENV_PARSE_MODE);

        store.set_setting("remote", "http_timeout_secs", "soon").unwrap();
        assert!(AppConfig::resolve(&ConfigOverrides::default(), &store).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_data_dir_resolution() {
        clear_env();
        let flag = PathBuf::from("/tmp/flag-dir");
        assert_eq!(resolve_data_dir(Some(&flag)), flag);

        std::env::set_var(ENV_DATA_DIR, "/tmp/env-dir");
        assert_eq!(resolve_data_dir(None), PathBuf::from("/tmp/env-dir"));
        assert_eq!(resolve_data_dir(Some(&flag)), flag);
        clear_env();
    }
}
