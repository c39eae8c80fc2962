//! Spendkit Common Library
//!
//! Shared building blocks for the spendkit transaction engine: error types,
//! domain records, fee arithmetic, settings, logging and lifecycle events.
//!
//! # Modules
//!
//! - `error`: The `SpendError` type and its categories
//! - `types`: Wallet, address and signing-device records
//! - `math`: Size and fee estimation
//! - `config`: Engine settings and settings stores
//! - `logging`: `env_logger` setup and log sanitizers
//! - `events`: Transaction lifecycle event bus
//!
//! # Security Considerations
//!
//! Nothing in this crate handles private keys. Records carry extended public
//! keys and derivation paths only, and log helpers truncate identifiers.

/// Error types shared by every engine component
pub mod error;

/// Core domain records
pub mod types;

/// Size and fee arithmetic
pub mod math;

/// Engine settings
pub mod config;

/// Logging setup
pub mod logging;

/// Transaction lifecycle events
pub mod events;

pub use bitcoin::{Address, Network, OutPoint, Transaction, Txid};

pub use config::{EngineSettings, SettingsStore, StaticSettings, TomlSettingsStore};
pub use error::{ErrorCategory, SpendError, SpendResult};
pub use events::{BroadcastOutput, TransactionEvent, TransactionEventBus};
pub use math::{calculate_fee, estimate_fee, estimate_size, is_dust_amount};
pub use types::{
    ScriptType, SigType, SigningDevice, Wallet, WalletAddress, CHANGE_CHAIN, DUST_THRESHOLD,
    RECEIVE_CHAIN,
};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::sync::Once;

static INIT: Once = Once::new();

/// Library initialization
///
/// Installs the default logger. Safe to call multiple times.
pub fn init() -> Result<(), String> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = logging::init(&logging::LogConfig::default())
            .map_err(|e| format!("Failed to initialize logging: {}", e));
    });
    result
}
