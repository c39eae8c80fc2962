//! Standardized error handling for spendkit
//!
//! Every fallible operation of the engine returns [`SpendResult`]. The variants of
//! [`SpendError`] mirror the decisions the engine makes, so callers can tell a bad
//! request apart from an empty wallet or a failed chain lookup without parsing text.
//!
//! # Security Considerations
//!
//! - Error messages carry amounts, counts and identifiers, never key material
//! - Extended public keys are not embedded in error text; descriptors are referred
//!   to by wallet id
//! - [`SpendError::user_message`] is the only text that should reach end users
//!
//! # Usage
//!
//! ```
//! use spendkit_common::error::{SpendError, SpendResult};
//!
//! fn check_amount(amount: u64) -> SpendResult<u64> {
//!     if amount == 0 {
//!         return Err(SpendError::validation("amount must be greater than zero"));
//!     }
//!     Ok(amount)
//! }
//!
//! assert!(check_amount(0).is_err());
//! ```

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// The main error type for the transaction engine
#[derive(Debug, Error)]
pub enum SpendError {
    /// Malformed or inconsistent request data (empty outputs, quorum/key mismatch, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination that does not decode under the wallet's network
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Unknown wallet, UTXO or address record
    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    /// Selection exhausted the eligible set and is still short
    #[error("Insufficient funds: need {required} sats (amount + fee), only {available} sats available")]
    InsufficientFunds { required: u64, available: u64 },

    /// The eligible UTXO set was empty before selection started
    #[error("No spendable UTXOs for wallet {wallet_id}")]
    NoSpendableUtxos { wallet_id: String },

    /// Key derivation metadata could not be produced (soft, build continues)
    #[error("Derivation error: {0}")]
    Derivation(String),

    /// Signatures could not be assembled into a final witness (hard, blocks broadcast)
    #[error("Finalization error: {0}")]
    Finalization(String),

    /// Chain data source failures, surfaced unchanged
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Settings could not be loaded or are out of range
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Bundle, transaction or settings (de)serialization failures
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

/// Type alias for a Result with SpendError
pub type SpendResult<T> = Result<T, SpendError>;

/// Error category for logging and metrics purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Funds,
    Derivation,
    Finalization,
    Transport,
    Config,
    Serialization,
}

impl ErrorCategory {
    /// Convert the error category to a string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "Validation",
            ErrorCategory::NotFound => "NotFound",
            ErrorCategory::Funds => "Funds",
            ErrorCategory::Derivation => "Derivation",
            ErrorCategory::Finalization => "Finalization",
            ErrorCategory::Transport => "Transport",
            ErrorCategory::Config => "Config",
            ErrorCategory::Serialization => "Serialization",
        }
    }
}

impl SpendError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        SpendError::Validation(message.into())
    }

    /// Create a new not-found error for the given record kind
    pub fn not_found<S: Into<String>>(kind: &'static str, id: S) -> Self {
        SpendError::ResourceNotFound { kind, id: id.into() }
    }

    /// Create a new derivation error
    pub fn derivation<S: Into<String>>(message: S) -> Self {
        SpendError::Derivation(message.into())
    }

    /// Create a new finalization error
    pub fn finalization<S: Into<String>>(message: S) -> Self {
        SpendError::Finalization(message.into())
    }

    /// Create a transport error without an underlying source
    pub fn transport<S: Into<String>>(context: S) -> Self {
        SpendError::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping the client's error
    pub fn transport_with_source<S, E>(context: S, source: E) -> Self
    where
        S: Into<String>,
        E: StdError + Send + Sync + 'static,
    {
        SpendError::Transport {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error without an underlying source
    pub fn config<S: Into<String>>(context: S) -> Self {
        SpendError::Config {
            context: context.into(),
            source: None,
        }
    }

    /// Create a serialization error without an underlying source
    pub fn serialization<S: Into<String>>(context: S) -> Self {
        SpendError::Serialization {
            context: context.into(),
            source: None,
        }
    }

    /// Get the category of this error for metrics and logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            SpendError::Validation(_) | SpendError::InvalidAddress(_) => ErrorCategory::Validation,
            SpendError::ResourceNotFound { .. } => ErrorCategory::NotFound,
            SpendError::InsufficientFunds { .. } | SpendError::NoSpendableUtxos { .. } => {
                ErrorCategory::Funds
            }
            SpendError::Derivation(_) => ErrorCategory::Derivation,
            SpendError::Finalization(_) => ErrorCategory::Finalization,
            SpendError::Transport { .. } => ErrorCategory::Transport,
            SpendError::Config { .. } => ErrorCategory::Config,
            SpendError::Serialization { .. } => ErrorCategory::Serialization,
        }
    }

    /// Soft errors are recorded and the build continues; everything else aborts it
    pub fn is_soft(&self) -> bool {
        matches!(self, SpendError::Derivation(_))
    }

    /// Get a sanitized message suitable for displaying to users
    pub fn user_message(&self) -> String {
        match self {
            SpendError::Derivation(_) => {
                "Signer metadata could not be derived for an input".to_string()
            }
            SpendError::Transport { context, .. } => {
                format!("Chain data source error: {}", context)
            }
            SpendError::Config { context, .. } => format!("Configuration error: {}", context),
            SpendError::Serialization { context, .. } => format!("Data format error: {}", context),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for SpendError {
    fn from(err: io::Error) -> Self {
        SpendError::Config {
            context: format!("I/O error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for SpendError {
    fn from(err: serde_json::Error) -> Self {
        SpendError::Serialization {
            context: format!("JSON serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for SpendError {
    fn from(err: toml::de::Error) -> Self {
        SpendError::Config {
            context: format!("TOML deserialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::consensus::encode::Error> for SpendError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        SpendError::Serialization {
            context: format!("Bitcoin serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::psbt::Error> for SpendError {
    fn from(err: bitcoin::psbt::Error) -> Self {
        SpendError::Serialization {
            context: format!("Bundle error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::bip32::Error> for SpendError {
    fn from(err: bitcoin::bip32::Error) -> Self {
        SpendError::Derivation(format!("BIP32 error: {}", err))
    }
}

impl From<bitcoin::address::Error> for SpendError {
    fn from(err: bitcoin::address::Error) -> Self {
        SpendError::InvalidAddress(format!("Invalid Bitcoin address: {}", err))
    }
}
