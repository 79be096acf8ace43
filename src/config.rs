use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Config file name looked up under `$HOME` when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = ".gatorconfig.toml";

/// User that a freshly written config points at.
pub const DEFAULT_USER_NAME: &str = "lane";

/// Feed fetched by the `agg` command unless the config overrides it.
pub const DEFAULT_AGG_URL: &str = "https://www.wagslane.dev/index.xml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot locate config file: HOME is not set and GATOR_CONFIG is empty")]
    NoHome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// sqlx connection string for the SQLite database
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_user_name")]
    pub current_user_name: String,
    #[serde(default = "default_agg_url")]
    pub agg_url: String,
    /// Fetch timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_db_url() -> String {
    "sqlite:gator.db?mode=rwc".to_string()
}

fn default_user_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

fn default_agg_url() -> String {
    DEFAULT_AGG_URL.to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            current_user_name: default_user_name(),
            agg_url: default_agg_url(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Config {
    /// Resolve the config path: `$GATOR_CONFIG` first, then `$HOME/.gatorconfig.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os("GATOR_CONFIG").filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home).join(CONFIG_FILE_NAME))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Load the config, writing the defaults first if the file does not exist yet.
    pub fn load_or_init<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file missing, writing defaults");
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
