//! Request and result types of the build pipeline

use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::{OutPoint, ScriptBuf};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::derivation::resolver::DerivationOutcome;
use crate::utxo_selection::types::{SelectionMode, SelectionStrategy};

/// One payment destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Destination address, decoded under the wallet's network
    pub address: String,
    /// Amount in satoshis; ignored in send-max mode
    pub amount: u64,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

/// A spend request
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub wallet_id: String,
    /// One or more destinations; exactly one for send-max and subtract-fee
    pub recipients: Vec<Recipient>,
    /// Fee rate in sat/vB
    pub fee_rate: Decimal,
    pub strategy: SelectionStrategy,
    pub mode: SelectionMode,
    /// Spend exactly these UTXOs instead of selecting automatically
    pub utxo_ids: Option<Vec<OutPoint>>,
    /// Split change into this many outputs (2 to 4)
    pub decoy_count: Option<usize>,
    /// Override the RBF default from the engine settings
    pub enable_rbf: Option<bool>,
    /// Draft on whose behalf the build runs; its own reservations stay usable
    pub lock_owner: Option<String>,
}

impl BuildRequest {
    /// Create a standard request with the default strategy
    pub fn new(wallet_id: impl Into<String>, recipients: Vec<Recipient>, fee_rate: Decimal) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            recipients,
            fee_rate,
            strategy: SelectionStrategy::default(),
            mode: SelectionMode::default(),
            utxo_ids: None,
            decoy_count: None,
            enable_rbf: None,
            lock_owner: None,
        }
    }

    /// Create a request paying a single destination
    pub fn send(
        wallet_id: impl Into<String>,
        address: impl Into<String>,
        amount: u64,
        fee_rate: Decimal,
    ) -> Self {
        Self::new(wallet_id, vec![Recipient::new(address, amount)], fee_rate)
    }

    pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_utxos(mut self, utxo_ids: Vec<OutPoint>) -> Self {
        self.utxo_ids = Some(utxo_ids);
        self
    }

    pub fn with_decoys(mut self, count: usize) -> Self {
        self.decoy_count = Some(count);
        self
    }

    pub fn with_rbf(mut self, enable: bool) -> Self {
        self.enable_rbf = Some(enable);
        self
    }

    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = Some(owner.into());
        self
    }

    /// Sum of the requested recipient amounts, `None` on overflow
    pub fn requested_total(&self) -> Option<u64> {
        self.recipients
            .iter()
            .try_fold(0u64, |sum, recipient| sum.checked_add(recipient.amount))
    }
}

/// Role of an output in a built transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Recipient,
    Change,
    Decoy,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Recipient => write!(f, "recipient"),
            OutputKind::Change => write!(f, "change"),
            OutputKind::Decoy => write!(f, "decoy"),
        }
    }
}

/// A selected input with the metadata attached for signers
#[derive(Debug, Clone)]
pub struct BuiltInput {
    pub outpoint: OutPoint,
    pub amount: u64,
    pub address: String,
    /// Canonical derivation path of the owning address, when known
    pub derivation_path: Option<String>,
    /// Whether signer metadata was attached, and why not
    pub derivation: DerivationOutcome,
    /// Multisig witness script, when derived
    pub witness_script: Option<ScriptBuf>,
}

/// An output of the built transaction, in transaction order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltOutput {
    pub address: String,
    pub amount: u64,
    pub kind: OutputKind,
}

/// Change split across decoy outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoyInfo {
    /// Number of change-like outputs
    pub count: usize,
    /// First change address used, for bookkeeping only
    pub primary_change_address: String,
}

/// Outcome of a build: an unsigned bundle plus a summary of it
///
/// `total_input == total_output + fee` always holds.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// The unsigned bundle
    pub psbt: PartiallySignedTransaction,
    /// The bundle in base64, as handed to signers
    pub psbt_base64: String,
    /// Inputs in transaction order
    pub inputs: Vec<BuiltInput>,
    /// Outputs in transaction order (shuffled)
    pub outputs: Vec<BuiltOutput>,
    pub fee: u64,
    pub total_input: u64,
    pub total_output: u64,
    /// The single change address; `None` without change or with decoys
    pub change_address: Option<String>,
    /// The single change amount; 0 without change or with decoys
    pub change_amount: u64,
    /// What the recipients receive in total
    pub effective_amount: u64,
    /// Present only when change was split into decoys
    pub decoy: Option<DecoyInfo>,
    /// Whether inputs signal replace-by-fee
    pub rbf: bool,
}

impl BuildResult {
    /// Outputs of one kind
    pub fn outputs_of(&self, kind: OutputKind) -> impl Iterator<Item = &BuiltOutput> {
        self.outputs.iter().filter(move |output| output.kind == kind)
    }
}
