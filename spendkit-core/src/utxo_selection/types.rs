//! Core types for UTXO selection
//!
//! # Key Types
//!
//! - [`Utxo`]: A wallet-owned unspent output as served by the UTXO directory
//! - [`SelectionStrategy`]: Ordering used by automatic selection
//! - [`SelectionMode`]: Standard send, send-max, or fee-subtracted send
//! - [`SelectionRequest`] / [`Selection`]: Input and outcome of one selection
//!
//! # Security Considerations
//!
//! - A `Utxo` holds the locking script and owning address, never keys
//! - Spent and frozen UTXOs are never selectable, not even by explicit id

use bitcoin::{OutPoint, ScriptBuf};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::types::ScriptType;

/// Unspent transaction output owned by a wallet
///
/// Deserialization goes through the same zero-amount check as [`Utxo::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UtxoRecord")]
pub struct Utxo {
    /// Reference to the transaction output (txid and vout)
    pub outpoint: OutPoint,

    /// Amount in satoshis, always greater than zero
    pub amount: u64,

    /// Locking script of the output
    pub script_pubkey: ScriptBuf,

    /// Owning address
    pub address: String,

    /// Spent by a broadcast transaction
    pub spent: bool,

    /// Excluded from spending by the user
    pub frozen: bool,

    /// Number of confirmations (0 for unconfirmed)
    pub confirmations: u32,

    /// Draft that currently reserves this UTXO, if any
    pub lock_owner: Option<String>,
}

/// Unchecked wire form of [`Utxo`]
#[derive(Deserialize)]
struct UtxoRecord {
    outpoint: OutPoint,
    amount: u64,
    script_pubkey: ScriptBuf,
    address: String,
    #[serde(default)]
    spent: bool,
    #[serde(default)]
    frozen: bool,
    #[serde(default)]
    confirmations: u32,
    #[serde(default)]
    lock_owner: Option<String>,
}

impl TryFrom<UtxoRecord> for Utxo {
    type Error = SpendError;

    fn try_from(record: UtxoRecord) -> SpendResult<Self> {
        let mut utxo = Utxo::new(
            record.outpoint,
            record.amount,
            record.script_pubkey,
            record.address,
        )?;
        utxo.spent = record.spent;
        utxo.frozen = record.frozen;
        utxo.confirmations = record.confirmations;
        utxo.lock_owner = record.lock_owner;
        Ok(utxo)
    }
}

impl Utxo {
    /// Create an unspent, unfrozen, unconfirmed UTXO
    ///
    /// # Returns
    /// * `Validation` error if `amount` is zero
    pub fn new(
        outpoint: OutPoint,
        amount: u64,
        script_pubkey: ScriptBuf,
        address: impl Into<String>,
    ) -> SpendResult<Self> {
        if amount == 0 {
            return Err(SpendError::validation(format!(
                "UTXO {} has a zero amount",
                outpoint
            )));
        }
        Ok(Self {
            outpoint,
            amount,
            script_pubkey,
            address: address.into(),
            spent: false,
            frozen: false,
            confirmations: 0,
            lock_owner: None,
        })
    }

    /// Set the number of confirmations
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Reserve the UTXO for a draft
    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = Some(owner.into());
        self
    }

    /// Freeze the UTXO
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether the UTXO can be spent at all (not spent, not frozen, non-zero)
    pub fn is_spendable(&self) -> bool {
        !self.spent && !self.frozen && self.amount > 0
    }

    /// Whether the UTXO is reserved by someone other than `owner`
    pub fn is_locked_for(&self, owner: Option<&str>) -> bool {
        match (&self.lock_owner, owner) {
            (None, _) => false,
            (Some(lock), Some(requester)) => lock != requester,
            (Some(_), None) => true,
        }
    }
}

/// Ordering used by automatic selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Spend the largest UTXOs first (fewest inputs)
    #[default]
    LargestFirst,
    /// Spend the smallest UTXOs first (consolidates small coins)
    SmallestFirst,
    /// Reserved, not implemented
    BranchAndBound,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionStrategy::LargestFirst => write!(f, "LargestFirst"),
            SelectionStrategy::SmallestFirst => write!(f, "SmallestFirst"),
            SelectionStrategy::BranchAndBound => write!(f, "BranchAndBound"),
        }
    }
}

/// How the target amount relates to the fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Recipients receive the target; the fee comes on top
    #[default]
    Standard,
    /// Spend every eligible UTXO to a single recipient, no change
    SendMax,
    /// Cover only the nominal amount and deduct the fee from it
    SubtractFee,
}

/// Fee and dust parameters shared by the strategies
#[derive(Debug, Clone)]
pub struct SelectionParams {
    /// Sum of recipient amounts in satoshis
    pub target: u64,
    /// Fee rate in sat/vB
    pub fee_rate: Decimal,
    /// Script type of the spent inputs
    pub script_type: ScriptType,
    /// Number of recipient outputs
    pub recipient_count: usize,
    /// Smallest change output worth creating
    pub dust_threshold: u64,
}

/// Everything the selector needs for one wallet
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub wallet_id: String,
    pub params: SelectionParams,
    pub strategy: SelectionStrategy,
    pub mode: SelectionMode,
    /// Exact UTXOs to spend, bypassing automatic selection
    pub explicit: Option<Vec<OutPoint>>,
    /// Minimum confirmations for eligibility
    pub confirmation_threshold: u32,
    /// Reservations held by this owner do not exclude a UTXO
    pub lock_owner: Option<String>,
}

/// Outcome of a successful selection
///
/// `total_input == recipient_amount + change + fee` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected UTXOs in spend order
    pub selected: Vec<Utxo>,
    /// Sum of selected amounts
    pub total_input: u64,
    /// What the recipients receive in total
    pub recipient_amount: u64,
    /// Leftover for change outputs (0 when absorbed into the fee)
    pub change: u64,
    /// Fee in satoshis
    pub fee: u64,
}

impl Selection {
    /// Assemble a selection, checking that the amounts balance
    pub(crate) fn balanced(
        selected: Vec<Utxo>,
        recipient_amount: u64,
        change: u64,
        fee: u64,
    ) -> SpendResult<Self> {
        let total_input = total_value(&selected);
        let total_output = recipient_amount
            .checked_add(change)
            .and_then(|sum| sum.checked_add(fee));
        if total_output != Some(total_input) {
            return Err(SpendError::validation(format!(
                "Selection does not balance: inputs {} sats, outputs {} + change {} + fee {}",
                total_input, recipient_amount, change, fee
            )));
        }
        Ok(Self {
            selected,
            total_input,
            recipient_amount,
            change,
            fee,
        })
    }

    /// Number of selected inputs
    pub fn input_count(&self) -> usize {
        self.selected.len()
    }
}

/// Total value of UTXOs in satoshis
pub fn total_value(utxos: &[Utxo]) -> u64 {
    utxos.iter().map(|utxo| utxo.amount).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    fn utxo(amount: u64) -> SpendResult<Utxo> {
        Utxo::new(
            OutPoint::new(Txid::all_zeros(), 0),
            amount,
            ScriptBuf::new(),
            "tb1qtest",
        )
    }

    #[test]
    fn zero_amount_is_rejected() {
        assert!(utxo(0).is_err());
        assert!(utxo(1).is_ok());
    }

    #[test]
    fn deserialized_records_are_validated() {
        let coin = utxo(1_000).unwrap().with_confirmations(3);
        let mut record = serde_json::to_value(&coin).unwrap();
        assert_eq!(serde_json::from_value::<Utxo>(record.clone()).unwrap(), coin);

        record["amount"] = serde_json::json!(0);
        let err = serde_json::from_value::<Utxo>(record).unwrap_err();
        assert!(err.to_string().contains("zero amount"));
    }

    #[test]
    fn missing_flags_default_to_unspent() {
        let coin = utxo(2_000).unwrap();
        let mut record = serde_json::to_value(&coin).unwrap();
        let fields = record.as_object_mut().unwrap();
        for flag in ["spent", "frozen", "confirmations", "lock_owner"] {
            fields.remove(flag);
        }

        let parsed: Utxo = serde_json::from_value(record).unwrap();
        assert_eq!(parsed, coin);
        assert!(parsed.is_spendable());
    }

    #[test]
    fn lock_owner_matching() {
        let free = utxo(1_000).unwrap();
        assert!(!free.is_locked_for(None));

        let locked = free.with_lock_owner("draft-1");
        assert!(locked.is_locked_for(None));
        assert!(locked.is_locked_for(Some("draft-2")));
        assert!(!locked.is_locked_for(Some("draft-1")));
    }

    #[test]
    fn frozen_is_not_spendable() {
        let mut coin = utxo(1_000).unwrap();
        assert!(coin.is_spendable());
        coin.freeze();
        assert!(!coin.is_spendable());
    }

    #[test]
    fn unbalanced_selection_is_rejected() {
        let coins = vec![utxo(10_000).unwrap()];
        assert!(Selection::balanced(coins.clone(), 5_000, 3_000, 2_000).is_ok());
        assert!(Selection::balanced(coins, 5_000, 3_000, 1_000).is_err());
    }
}
