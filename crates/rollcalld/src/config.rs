use rollcall_core::config::{ConfigError, EngineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Gallery file (versioned JSON).
    pub store_path: PathBuf,
    /// TOML file holding the `[matching]` engine settings.
    pub settings_path: PathBuf,
    /// Dimension of the vectors produced by the embedding model.
    pub dimension: usize,
    pub bus: BusKind,
    /// Maximum number of low-confidence matches awaiting confirmation.
    pub max_pending: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".local/share"))
            .join("rollcall");

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir().join(".config"))
            .join("rollcall");

        let store_path = std::env::var("ROLLCALL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.json"));

        let settings_path = std::env::var("ROLLCALL_SETTINGS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("settings.toml"));

        Self {
            store_path,
            settings_path,
            dimension: env_usize("ROLLCALL_DIMENSION", 128),
            bus: match std::env::var("ROLLCALL_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
            max_pending: env_usize("ROLLCALL_MAX_PENDING", 256),
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid settings: {0}")]
    Invalid(#[from] ConfigError),
}

/// On-disk layout of the settings file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    matching: EngineConfig,
}

/// Read and validate engine settings. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<EngineConfig, SettingsError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no settings file; using defaults");
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_settings(&text).map_err(|e| match e {
        SettingsError::Parse { source, .. } => SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

fn parse_settings(text: &str) -> Result<EngineConfig, SettingsError> {
    let file: SettingsFile = toml::from_str(text).map_err(|source| SettingsError::Parse {
        path: PathBuf::new(),
        source,
    })?;
    Ok(file.matching.validated()?)
}

/// Write engine settings so they survive a restart.
pub fn save_settings(path: &Path, config: &EngineConfig) -> Result<(), SettingsError> {
    let io_err = |source: std::io::Error| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let text = toml::to_string(&SettingsFile {
        matching: config.clone(),
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, text).map_err(io_err)
}
