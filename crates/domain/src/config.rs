//! Environment-driven configuration used to select the persistence backend.

use std::{env, path::PathBuf, time::Duration};

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub const DEFAULT_TREE_PREFIX: &str = "usb";
pub const DEFAULT_BLOB_KEY: &str = "usb/config";
pub const DEFAULT_BLOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Value of `USB_TREE_PATH` selecting the in-process tree store.
pub const MEMORY_TREE_PATH: &str = "memory";
/// Value of `USB_BLOB_PATH` selecting the in-process blob store.
pub const MEMORY_BLOB_PATH: &str = "memory";

/// Backend families an operator can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    File,
    Tree,
    Sql,
    Blob,
}

/// Operator-supplied location of the one backend the process uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    backend: BackendKind,
    config_file: Option<PathBuf>,
    settings_file: Option<PathBuf>,
    tree_path: Option<String>,
    tree_prefix: String,
    database_url: Option<String>,
    blob_path: Option<String>,
    blob_key: String,
    blob_ttl: Duration,
}

impl ProviderConfig {
    /// Hydrates `.env` (if present) and reads the `USB_*` variables. The
    /// location variable matching the selected backend is required.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let raw_backend = get_required_var("USB_PROVIDER")?;
        let backend = raw_backend
            .parse::<BackendKind>()
            .map_err(|_| ConfigError::UnknownBackend(raw_backend.clone()))?;

        let config_file = get_optional_var("USB_CONFIG_FILE").map(PathBuf::from);
        let tree_path = get_optional_var("USB_TREE_PATH");
        let database_url = get_optional_var("USB_DATABASE_URL");
        let blob_path = get_optional_var("USB_BLOB_PATH");

        match backend {
            BackendKind::File if config_file.is_none() => {
                return Err(ConfigError::MissingVar {
                    key: "USB_CONFIG_FILE",
                })
            }
            BackendKind::Tree if tree_path.is_none() => {
                return Err(ConfigError::MissingVar {
                    key: "USB_TREE_PATH",
                })
            }
            BackendKind::Sql if database_url.is_none() => {
                return Err(ConfigError::MissingVar {
                    key: "USB_DATABASE_URL",
                })
            }
            BackendKind::Blob if blob_path.is_none() => {
                return Err(ConfigError::MissingVar {
                    key: "USB_BLOB_PATH",
                })
            }
            _ => {}
        }

        let blob_ttl = match get_optional_var("USB_BLOB_TTL_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|source| ConfigError::InvalidNumber {
                    key: "USB_BLOB_TTL_SECS",
                    source,
                })?;
                Duration::from_secs(secs.max(1))
            }
            None => DEFAULT_BLOB_TTL,
        };

        Ok(Self {
            backend,
            config_file,
            settings_file: get_optional_var("USB_SETTINGS_FILE").map(PathBuf::from),
            tree_path,
            tree_prefix: get_optional_var("USB_TREE_PREFIX")
                .unwrap_or_else(|| DEFAULT_TREE_PREFIX.to_string()),
            database_url,
            blob_path,
            blob_key: get_optional_var("USB_BLOB_KEY")
                .unwrap_or_else(|| DEFAULT_BLOB_KEY.to_string()),
            blob_ttl,
        })
    }

    /// Starts a configuration with defaults for everything but the backend.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            config_file: None,
            settings_file: None,
            tree_path: None,
            tree_prefix: DEFAULT_TREE_PREFIX.to_string(),
            database_url: None,
            blob_path: None,
            blob_key: DEFAULT_BLOB_KEY.to_string(),
            blob_ttl: DEFAULT_BLOB_TTL,
        }
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn with_settings_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_file = Some(path.into());
        self
    }

    pub fn with_tree_path(mut self, path: impl Into<String>) -> Self {
        self.tree_path = Some(path.into());
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_blob_path(mut self, path: impl Into<String>) -> Self {
        self.blob_path = Some(path.into());
        self
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn config_file(&self) -> Option<&PathBuf> {
        self.config_file.as_ref()
    }

    pub fn settings_file(&self) -> Option<&PathBuf> {
        self.settings_file.as_ref()
    }

    pub fn tree_path(&self) -> Option<&str> {
        self.tree_path.as_deref()
    }

    pub fn tree_prefix(&self) -> &str {
        &self.tree_prefix
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    /// Directory of the file-backed blob store, or [`MEMORY_BLOB_PATH`].
    pub fn blob_path(&self) -> Option<&str> {
        self.blob_path.as_deref()
    }

    pub fn blob_key(&self) -> &str {
        &self.blob_key
    }

    pub fn blob_ttl(&self) -> Duration {
        self.blob_ttl
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("USB_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("unknown provider `{0}` (expected file, tree, sql or blob)")]
    UnknownBackend(String),
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const VARS: [&str; 9] = [
        "USB_PROVIDER",
        "USB_CONFIG_FILE",
        "USB_SETTINGS_FILE",
        "USB_TREE_PATH",
        "USB_TREE_PREFIX",
        "USB_DATABASE_URL",
        "USB_BLOB_PATH",
        "USB_BLOB_KEY",
        "USB_BLOB_TTL_SECS",
    ];

    fn reset_env() {
        std::env::set_var("USB_SKIP_DOTENV", "1");
        for key in VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn file_provider_requires_config_file() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("USB_PROVIDER", "file");

        let err = ProviderConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "USB_CONFIG_FILE"
            }
        ));

        std::env::set_var("USB_CONFIG_FILE", " /etc/usb/config.yml ");
        let config = ProviderConfig::load_from_env().expect("config loads");
        assert_eq!(config.backend(), BackendKind::File);
        assert_eq!(
            config.config_file(),
            Some(&PathBuf::from("/etc/usb/config.yml"))
        );
        reset_env();
    }

    #[test]
    fn tree_provider_uses_default_prefix() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("USB_PROVIDER", "Tree");
        std::env::set_var("USB_TREE_PATH", MEMORY_TREE_PATH);

        let config = ProviderConfig::load_from_env().expect("config loads");
        assert_eq!(config.backend(), BackendKind::Tree);
        assert_eq!(config.tree_prefix(), DEFAULT_TREE_PREFIX);
        assert_eq!(config.tree_path(), Some(MEMORY_TREE_PATH));
        reset_env();
    }

    #[test]
    fn blob_provider_reads_ttl() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("USB_PROVIDER", "blob");
        std::env::set_var("USB_BLOB_TTL_SECS", "90");
        std::env::set_var("USB_BLOB_KEY", "broker/config");

        let err = ProviderConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { key: "USB_BLOB_PATH" }));

        std::env::set_var("USB_BLOB_PATH", "/var/lib/usb/blobs");
        let config = ProviderConfig::load_from_env().expect("config loads");
        assert_eq!(config.blob_path(), Some("/var/lib/usb/blobs"));
        assert_eq!(config.blob_ttl(), Duration::from_secs(90));
        assert_eq!(config.blob_key(), "broker/config");

        std::env::set_var("USB_BLOB_TTL_SECS", "soon");
        let err = ProviderConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "USB_BLOB_TTL_SECS",
                ..
            }
        ));
        reset_env();
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("USB_PROVIDER", "consul-ish");

        let err = ProviderConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(name) if name == "consul-ish"));
        reset_env();
    }

    #[test]
    fn missing_provider_is_reported() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();

        let err = ProviderConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { key: "USB_PROVIDER" }));
    }
}
