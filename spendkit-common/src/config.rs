//! Engine settings and the settings store they are loaded from.
//!
//! The engine does not own its configuration. Operators keep the confirmation
//! threshold and dust threshold in a system-settings store, and the engine
//! reloads them through [`SettingsStore::load`] at the start of every build so a
//! change takes effect on the next request without a restart.
//!
//! ## Security Considerations
//!
//! - No key material is ever stored in settings
//! - All values are validated before use; an out-of-range value fails the build
//!   instead of being silently clamped

use log::debug;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SpendError, SpendResult};
use crate::types::DUST_THRESHOLD;

/// Settings consumed by the transaction engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Minimum confirmations before a UTXO is selectable
    #[serde(default = "default_confirmation_threshold")]
    pub confirmation_threshold: u32,

    /// Smallest output value worth creating, in satoshis
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,

    /// Maximum in-flight previous-transaction fetches for legacy inputs
    #[serde(default = "default_fetch_concurrency")]
    pub prev_tx_fetch_concurrency: usize,

    /// Signal replace-by-fee on inputs unless the request says otherwise
    #[serde(default = "default_true")]
    pub enable_rbf: bool,

    /// Fee rates above this (sat/vB) are rejected as a likely input mistake
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confirmation_threshold: default_confirmation_threshold(),
            dust_threshold: default_dust_threshold(),
            prev_tx_fetch_concurrency: default_fetch_concurrency(),
            enable_rbf: default_true(),
            max_fee_rate: default_max_fee_rate(),
        }
    }
}

impl EngineSettings {
    /// Validate the settings
    pub fn validate(&self) -> SpendResult<()> {
        if self.dust_threshold == 0 {
            return Err(SpendError::config("dust_threshold must be greater than zero"));
        }
        if self.prev_tx_fetch_concurrency == 0 {
            return Err(SpendError::config(
                "prev_tx_fetch_concurrency must be greater than zero",
            ));
        }
        if self.max_fee_rate <= Decimal::ZERO {
            return Err(SpendError::config("max_fee_rate must be positive"));
        }
        Ok(())
    }

    /// Parse settings from a TOML document with an optional `[engine]` table
    pub fn from_toml_str(content: &str) -> SpendResult<Self> {
        let file: SettingsFile = toml::from_str(content)?;
        let settings = file.engine;
        settings.validate()?;
        Ok(settings)
    }
}

/// On-disk layout of the settings file
#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    engine: EngineSettings,
}

/// Source of engine settings, consulted once per build
pub trait SettingsStore: Send + Sync {
    /// Load the current settings
    fn load(&self) -> SpendResult<EngineSettings>;
}

/// Settings store returning a fixed value
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    settings: EngineSettings,
}

impl StaticSettings {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

impl SettingsStore for StaticSettings {
    fn load(&self) -> SpendResult<EngineSettings> {
        self.settings.validate()?;
        Ok(self.settings.clone())
    }
}

/// Settings store backed by a TOML file that is re-read on every load
///
/// A missing file yields the defaults; a malformed file is a configuration error.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> SpendResult<EngineSettings> {
        if !self.path.exists() {
            debug!("Settings file {} not found, using defaults", self.path.display());
            return Ok(EngineSettings::default());
        }
        let content = fs::read_to_string(&self.path)?;
        EngineSettings::from_toml_str(&content)
    }
}

// Default value functions
fn default_confirmation_threshold() -> u32 {
    1
}

fn default_dust_threshold() -> u64 {
    DUST_THRESHOLD
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_fee_rate() -> Decimal {
    dec!(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.confirmation_threshold, 1);
        assert_eq!(settings.dust_threshold, 546);
        assert_eq!(settings.prev_tx_fetch_concurrency, 5);
        assert!(settings.enable_rbf);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let settings = EngineSettings::from_toml_str(
            "[engine]\nconfirmation_threshold = 3\n",
        )
        .unwrap();
        assert_eq!(settings.confirmation_threshold, 3);
        assert_eq!(settings.dust_threshold, 546);
    }

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(EngineSettings::from_toml_str("").unwrap(), EngineSettings::default());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = EngineSettings::from_toml_str("[engine]\nprev_tx_fetch_concurrency = 0\n");
        assert!(matches!(result, Err(SpendError::Config { .. })));
    }
}
