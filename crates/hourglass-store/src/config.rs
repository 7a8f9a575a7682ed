// ABOUTME: Configuration loading for hourglass save slots from environment variables.
// ABOUTME: Resolves the data directory, the active slot number and output formatting.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("HOURGLASS_SLOT must be 1, 2 or 3, got '{0}'")]
    InvalidSlot(String),
}

/// Save-slot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub slot: u8,
    pub pretty: bool,
}

impl StoreConfig {
    pub const MAX_SLOT: u8 = 3;

    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - HOURGLASS_HOME: data directory (default: ~/.hourglass)
    /// - HOURGLASS_SLOT: save slot 1-3 (default: 1)
    /// - HOURGLASS_PRETTY: pretty-print the save file (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an explicit variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = lookup("HOURGLASS_HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                lookup("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".hourglass")
            });

        let slot = match lookup("HOURGLASS_SLOT") {
            None => 1,
            Some(raw) => match raw.trim().parse::<u8>() {
                Ok(n) if (1..=Self::MAX_SLOT).contains(&n) => n,
                _ => return Err(ConfigError::InvalidSlot(raw)),
            },
        };

        let pretty = lookup("HOURGLASS_PRETTY")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        Ok(Self { home, slot, pretty })
    }

    /// Path of the save file for the active slot.
    pub fn save_path(&self) -> PathBuf {
        self.home.join(format!("save{}.dat", self.slot))
    }
}
