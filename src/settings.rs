//! Layered configuration: defaults, TOML file, then `LANCHAT__*` environment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "lanchat";

/// Upper bound for `retention.max_age_hours` (100 years).
pub const MAX_RETENTION_HOURS: u64 = 100 * 365 * 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub identity: IdentityConfig,
    pub hub: HubConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            paths: PathsConfig::default(),
            identity: IdentityConfig::default(),
            hub: HubConfig::default(),
            retention: RetentionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the web client; empty disables static serving.
    pub static_dir: String,
    /// Maximum accepted upload body size in bytes.
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8008,
            static_dir: String::new(),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Path overrides; empty strings fall back to XDG defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: String,
    pub database: String,
    pub upload_dir: String,
    pub allowlist: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub reload_interval_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            reload_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Pending messages a session may queue before it is disconnected.
    pub queue_capacity: usize,
    pub ping_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: crate::ws::DEFAULT_QUEUE_CAPACITY,
            ping_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub max_age_hours: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_hours: 7 * 24,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.hub.queue_capacity >= 1, "hub.queue_capacity must be at least 1");
        ensure!(
            self.hub.ping_interval_secs >= 1,
            "hub.ping_interval_secs must be at least 1"
        );
        ensure!(
            self.identity.reload_interval_secs >= 1,
            "identity.reload_interval_secs must be at least 1"
        );
        ensure!(
            self.retention.max_age_hours >= 1,
            "retention.max_age_hours must be at least 1"
        );
        ensure!(
            self.retention.max_age_hours <= MAX_RETENTION_HOURS,
            "retention.max_age_hours must be at most {MAX_RETENTION_HOURS}"
        );
        ensure!(
            self.retention.sweep_interval_secs >= 1,
            "retention.sweep_interval_secs must be at least 1"
        );
        Ok(())
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.identity.reload_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.hub.ping_interval_secs)
    }

    pub fn retention_max_age(&self) -> Duration {
        Duration::from_secs(self.retention.max_age_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }
}

/// Fully resolved filesystem locations.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub upload_dir: PathBuf,
    pub allowlist: PathBuf,
    pub static_dir: Option<PathBuf>,
}

impl ResolvedPaths {
    pub fn resolve(config_file: &Path, cfg: &AppConfig) -> Result<Self> {
        let data_dir = non_empty_path(&cfg.paths.data_dir)?.map_or_else(default_data_dir, Ok)?;
        let database =
            non_empty_path(&cfg.paths.database)?.unwrap_or_else(|| data_dir.join("chat.db"));
        let upload_dir =
            non_empty_path(&cfg.paths.upload_dir)?.unwrap_or_else(|| data_dir.join("files"));
        let allowlist = match non_empty_path(&cfg.paths.allowlist)? {
            Some(path) => path,
            None => config_file
                .parent()
                .map(|dir| dir.join("whitelist.txt"))
                .ok_or_else(|| anyhow!("invalid config file path: {config_file:?}"))?,
        };
        let static_dir = non_empty_path(&cfg.server.static_dir)?;

        Ok(Self {
            config_file: config_file.to_path_buf(),
            data_dir,
            database,
            upload_dir,
            allowlist,
            static_dir,
        })
    }
}

fn non_empty_path(text: &str) -> Result<Option<PathBuf>> {
    if text.trim().is_empty() {
        Ok(None)
    } else {
        expand_str_path(text).map(Some)
    }
}

/// Resolve the config file location from an optional `--config` override.
pub fn discover_config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
    let config_file = match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                expanded.join("config.toml")
            } else {
                expanded
            }
        }
        None => default_config_dir()?.join("config.toml"),
    };

    if config_file.parent().is_none() {
        return Err(anyhow!("invalid config file path: {config_file:?}"));
    }
    Ok(config_file)
}

/// Load configuration from `path` (optional) layered under the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let env_prefix = env_prefix();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
        .build()
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], but writes the default file first if it is missing.
pub fn load_or_init_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        write_default_config(path)?;
    }
    load_config(path)
}

/// Write the default configuration, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Allow-list format: one `address-nickname` per line.\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
