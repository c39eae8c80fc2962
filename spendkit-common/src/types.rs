//! Core domain records for the transaction engine
//!
//! These are the typed shapes the engine consumes from its wallet and address
//! directories. Records are validated when they cross into the engine, so the
//! builders never have to second-guess a loosely-shaped row.
//!
//! # Security
//!
//! Records hold public data only: extended public keys, fingerprints and
//! derivation paths. Nothing here is ever a private key.

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SpendError;

/// Standard dust threshold in satoshis
pub const DUST_THRESHOLD: u64 = 546;

/// Chain index of receive addresses
pub const RECEIVE_CHAIN: u32 = 0;

/// Chain index of change addresses
pub const CHANGE_CHAIN: u32 = 1;

/// Script flavor of a wallet
///
/// For multisig wallets the same flavors select the multisig wrapping:
/// `Legacy` is P2SH, `NestedSegwit` is P2SH-P2WSH and `NativeSegwit` is P2WSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    /// Pay to Public Key Hash / P2SH multisig
    Legacy,
    /// P2SH-P2WPKH / P2SH-P2WSH multisig
    NestedSegwit,
    /// P2WPKH / P2WSH multisig
    NativeSegwit,
    /// Pay to Taproot (single-sig key path)
    Taproot,
}

impl ScriptType {
    /// All supported script flavors
    pub const ALL: [ScriptType; 4] = [
        ScriptType::Legacy,
        ScriptType::NestedSegwit,
        ScriptType::NativeSegwit,
        ScriptType::Taproot,
    ];

    /// Whether spending this flavor only needs the previous output (script + amount)
    /// rather than the whole previous transaction
    pub fn is_segwit(&self) -> bool {
        !matches!(self, ScriptType::Legacy)
    }

    /// Human-readable label for a multisig wallet of this flavor
    pub fn multisig_label(&self) -> &'static str {
        match self {
            ScriptType::Legacy => "Legacy multisig (P2SH)",
            ScriptType::NestedSegwit => "Nested SegWit multisig (P2SH-P2WSH)",
            ScriptType::NativeSegwit => "Native SegWit multisig (P2WSH)",
            ScriptType::Taproot => "Taproot multisig (unsupported)",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptType::Legacy => "legacy",
            ScriptType::NestedSegwit => "nested_segwit",
            ScriptType::NativeSegwit => "native_segwit",
            ScriptType::Taproot => "taproot",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ScriptType {
    type Err = SpendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "legacy" | "p2pkh" | "p2sh" => Ok(ScriptType::Legacy),
            "nested_segwit" | "p2sh_p2wpkh" | "p2sh_p2wsh" => Ok(ScriptType::NestedSegwit),
            "native_segwit" | "p2wpkh" | "p2wsh" => Ok(ScriptType::NativeSegwit),
            "taproot" | "p2tr" => Ok(ScriptType::Taproot),
            other => Err(SpendError::validation(format!("Unknown script type: {}", other))),
        }
    }
}

/// Signature scheme of a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigType {
    Single,
    Multi,
}

/// A hardware signer registered with a wallet
///
/// Every field is optional because devices are frequently registered before
/// the user exports their key. Missing data only disables signer metadata,
/// it never blocks a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningDevice {
    /// Master key fingerprint as 8 hex characters
    pub fingerprint: Option<String>,
    /// Account-level extended public key (xpub/tpub or a SLIP-132 variant)
    pub xpub: Option<String>,
    /// Account derivation path, e.g. `m/84'/0'/0'`
    pub derivation_path: Option<String>,
}

/// Wallet metadata as served by the wallet directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier
    pub id: String,
    /// Single-sig or multisig
    pub sig_type: SigType,
    /// Script flavor
    pub script_type: ScriptType,
    /// Bitcoin network
    pub network: Network,
    /// Output descriptor (required for multisig, optional fallback for single-sig)
    pub descriptor: Option<String>,
    /// Registered signing devices
    #[serde(default)]
    pub devices: Vec<SigningDevice>,
}

impl Wallet {
    /// Whether this wallet is multisig
    pub fn is_multisig(&self) -> bool {
        self.sig_type == SigType::Multi
    }

    /// Check the combinations the engine can build for
    pub fn validate(&self) -> Result<(), SpendError> {
        if self.is_multisig() {
            if self.script_type == ScriptType::Taproot {
                return Err(SpendError::validation(format!(
                    "Wallet {} is taproot multisig, which is not supported",
                    self.id
                )));
            }
            if self.descriptor.as_deref().map_or(true, str::is_empty) {
                return Err(SpendError::validation(format!(
                    "Multisig wallet {} has no descriptor",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// An address record owned by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddress {
    /// Encoded address
    pub address: String,
    /// Full derivation path, e.g. `m/84'/0'/0'/1/7`
    pub derivation_path: String,
    /// Whether the address has received funds before
    pub used: bool,
    /// 0 for receive, 1 for change
    pub chain: u32,
    /// Owning wallet
    pub wallet_id: String,
}

impl WalletAddress {
    /// Whether this is a change address
    pub fn is_change(&self) -> bool {
        self.chain == CHANGE_CHAIN
    }
}

/// Sanitize a string for display (to avoid leaking sensitive data)
///
/// This function keeps the first `prefix_chars` characters and replaces
/// the rest with asterisks.
pub fn sanitize_for_display(input: &str, prefix_chars: usize) -> String {
    if input.len() <= prefix_chars {
        return input.to_string();
    }

    let visible = &input[0..prefix_chars];
    let hidden = "*".repeat(input.len() - prefix_chars);
    format!("{}{}", visible, hidden)
}
