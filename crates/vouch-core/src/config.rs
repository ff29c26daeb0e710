use std::path::PathBuf;

use tracing::debug;

use vouch_types::{GroupMap, VerificationConfig};

use crate::error::{Result, VerificationError};

pub const DB_PATH_VAR: &str = "VOUCH_DB_PATH";
pub const MAX_MESSAGE_LENGTH_VAR: &str = "VOUCH_MAX_MESSAGE_LENGTH";
pub const GROUPS_VAR: &str = "VOUCH_GROUPS";

/// Process-level settings: where the database lives plus the verification rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub verifications: VerificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("vouch.db"),
            verifications: VerificationConfig::default(),
        }
    }
}

impl Config {
    /// Read settings from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        // Load .env if present
        let _ = dotenvy::dotenv();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = var(DB_PATH_VAR) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(raw) = var(MAX_MESSAGE_LENGTH_VAR) {
            config.verifications.max_message_length = raw.trim().parse().map_err(|e| {
                VerificationError::Config(format!("{MAX_MESSAGE_LENGTH_VAR}={raw:?}: {e}"))
            })?;
        }

        if let Some(raw) = var(GROUPS_VAR) {
            config.verifications.groups = raw
                .parse::<GroupMap>()
                .map_err(|e| VerificationError::Config(format!("{GROUPS_VAR}: {e}")))?;
        }

        debug!(
            db = %config.database_path.display(),
            max_message_length = config.verifications.max_message_length,
            groups = config.verifications.groups.iter().count(),
            "Configuration loaded"
        );
        Ok(config)
    }
}
