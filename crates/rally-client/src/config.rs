//! Session configuration, loaded from RON.
//!
//! Lives at `~/.config/rally/session.ron` by default. Every field has a
//! default, so a missing file (or a partial one) is fine:
//!
//! ```ron
//! (
//!     backend_host: "https://icp0.io",
//!     canisters: (
//!         main: "bkyz2-fmaaa-aaaaa-qaaaq-cai",
//!     ),
//! )
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_DIR, CONFIG_FILE, DEFAULT_BACKEND_HOST, DEFAULT_LEDGER_CANISTER, DEFAULT_MAIN_CANISTER,
    DEFAULT_STORAGE_CANISTER, DELEGATION_FILE, KEY_FILE, STORAGE_FILE,
};
use crate::provider::ServiceId;

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Canister ids of the backend services the configure phase builds actors for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanisterIds {
    pub main: String,
    pub ledger: String,
    pub storage: String,
}

impl Default for CanisterIds {
    fn default() -> Self {
        Self {
            main: DEFAULT_MAIN_CANISTER.to_string(),
            ledger: DEFAULT_LEDGER_CANISTER.to_string(),
            storage: DEFAULT_STORAGE_CANISTER.to_string(),
        }
    }
}

impl CanisterIds {
    pub fn get(&self, service: ServiceId) -> &str {
        match service {
            ServiceId::Main => &self.main,
            ServiceId::Ledger => &self.ledger,
            ServiceId::Storage => &self.storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the backend gateway.
    pub backend_host: String,
    pub canisters: CanisterIds,
    /// Durable key-value store; defaults to the platform data dir.
    pub storage_path: Option<PathBuf>,
    /// Ed25519 seed for the key-pair provider.
    pub key_path: Option<PathBuf>,
    /// Delegation document for the delegation provider.
    pub delegation_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend_host: DEFAULT_BACKEND_HOST.to_string(),
            canisters: CanisterIds::default(),
            storage_path: None,
            key_path: None,
            delegation_path: None,
        }
    }
}

impl SessionConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Parse a config from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_ron(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no session config, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load from the default location (or defaults if there is none).
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| data_file(STORAGE_FILE))
    }

    pub fn key_path(&self) -> PathBuf {
        self.key_path.clone().unwrap_or_else(|| data_file(KEY_FILE))
    }

    pub fn delegation_path(&self) -> PathBuf {
        self.delegation_path
            .clone()
            .unwrap_or_else(|| data_file(DELEGATION_FILE))
    }
}

fn data_file(name: &str) -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(name)
}
