use crate::application::dashboard_session::SessionSettings;
use crate::domain::grid::{BreakpointColumns, GridConfiguration};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("breakpoint columns must be non-zero and non-increasing: {0:?}")]
    ColumnsNotMonotonic(BreakpointColumns),
    #[error("persistence backend `rest` requires persistence.base_url")]
    MissingBaseUrl,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub persistence: PersistenceSettings,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub bind_address: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    Memory,
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceSettings {
    pub backend: PersistenceBackend,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    pub pending_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub idle_timeout_ms: u64,
}

impl ServerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pending_timeout: Duration::from_millis(self.sync.pending_timeout_ms),
            sweep_interval: Duration::from_millis(self.sync.sweep_interval_ms.max(1)),
            idle_timeout: Duration::from_millis(self.sync.idle_timeout_ms),
        }
    }

    /// REST base url, required when the REST backend is selected.
    pub fn rest_base_url(&self) -> Result<String, ConfigError> {
        self.persistence.base_url.clone().ok_or(ConfigError::MissingBaseUrl)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GridSettings {
    #[serde(default)]
    pub columns: BreakpointColumns,
    #[serde(default = "default_row_height")]
    pub row_height: u32,
    #[serde(default = "default_margin")]
    pub margin: [u32; 2],
}

fn default_row_height() -> u32 {
    60
}

fn default_margin() -> [u32; 2] {
    [16, 16]
}

impl GridSettings {
    pub fn into_grid(self) -> Result<GridConfiguration, ConfigError> {
        GridConfiguration::new(self.columns, self.row_height, self.margin)
            .ok_or(ConfigError::ColumnsNotMonotonic(self.columns))
    }
}

fn server_builder() -> anyhow::Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(config::Config::builder()
        .set_default("server.bind_address", "0.0.0.0:8080")?
        .set_default("persistence.backend", "memory")?
        .set_default("cache.ttl_seconds", 300)?
        .set_default("sync.pending_timeout_ms", 10_000)?
        .set_default("sync.sweep_interval_ms", 1_000)?
        .set_default("sync.idle_timeout_ms", 300_000)?)
}

pub fn load_server_config() -> anyhow::Result<ServerConfig> {
    let settings = server_builder()?
        .add_source(config::File::with_name("config/server").required(false))
        .add_source(config::Environment::with_prefix("WIDGET_SYNC").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_grid_config() -> anyhow::Result<GridConfiguration> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/grid").required(false))
        .build()?;

    let grid: GridSettings = settings.try_deserialize()?;
    Ok(grid.into_grid()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn test_server_defaults() {
        let config: ServerConfig =
            server_builder().unwrap().build().unwrap().try_deserialize().unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.persistence.backend, PersistenceBackend::Memory);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.session_settings().pending_timeout, Duration::from_secs(10));
        assert_eq!(config.session_settings().idle_timeout, Duration::from_secs(300));
        assert!(config.rest_base_url().is_err());
    }

    #[test]
    fn test_server_file_overrides() {
        let toml = r#"
            [persistence]
            backend = "rest"
            base_url = "http://store.local"

            [sync]
            pending_timeout_ms = 2500
            idle_timeout_ms = 60000
        "#;
        let config: ServerConfig = server_builder()
            .unwrap()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.persistence.backend, PersistenceBackend::Rest);
        assert_eq!(config.rest_base_url().unwrap(), "http://store.local");
        assert_eq!(config.session_settings().pending_timeout, Duration::from_millis(2500));
        assert_eq!(config.session_settings().idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_grid_settings_validated() {
        let toml = r#"
            row_height = 40
            [columns]
            lg = 12
            md = 10
            sm = 12
            xs = 4
            xxs = 2
        "#;
        let settings: GridSettings = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!(matches!(settings.into_grid(), Err(ConfigError::ColumnsNotMonotonic(_))));
    }

    #[test]
    fn test_empty_grid_settings_use_defaults() {
        let settings: GridSettings =
            config::Config::builder().build().unwrap().try_deserialize().unwrap();
        assert_eq!(settings.into_grid().unwrap(), GridConfiguration::default());
    }
}
