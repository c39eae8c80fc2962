//! Multisig Finalizer
//!
//! Runs after external signing. Signers return the bundle with partial
//! signatures; this module turns them into final witnesses and extracts the
//! broadcastable transaction.
//!
//! For P2WSH and P2SH-P2WSH multisig inputs:
//!
//! 1. The witness script is parsed back into `M`, `N` and its on-script keys
//! 2. Every partial signature is verified against the BIP143 digest of the
//!    input; failures are logged, the count check below decides
//! 3. Signatures are ordered to match the on-script keys; signatures from keys
//!    not in the script are dropped
//! 4. The witness becomes `[<empty>, sig_1 .. sig_M, witness_script]`
//!
//! Single-sig P2WPKH, P2SH-P2WPKH, P2PKH and taproot key-path inputs are
//! finalized from their one signature so single-sig bundles extract too.
//!
//! A multisig input that cannot be finalized is a hard error: the transaction
//! must not be broadcast. A `FinalizationFailed` event is published for it.

use bitcoin::consensus::encode;
use bitcoin::psbt::{Input, PartiallySignedTransaction};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, VerifyOnly};
use bitcoin::sighash::SighashCache;
use bitcoin::{ScriptBuf, Transaction, TxOut, Txid, Witness};
use log::{debug, info, warn};
use std::collections::BTreeMap;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::events::{TransactionEvent, TransactionEventBus};
use spendkit_common::logging::short_txid;

use crate::multisig::parse_multisig_script;

/// What happened to each input of a bundle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizationSummary {
    /// Inputs finalized by this run
    pub finalized: Vec<usize>,
    /// Inputs that were already final
    pub already_final: Vec<usize>,
    /// Inputs left untouched (missing signatures or unsupported script)
    pub pending: Vec<usize>,
}

impl FinalizationSummary {
    /// Whether every input is final
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTransaction {
    pub txid: Txid,
    pub tx: Transaction,
    /// Consensus serialization
    pub raw: Vec<u8>,
    pub raw_hex: String,
}

impl FinalizedTransaction {
    pub fn new(tx: Transaction) -> Self {
        let raw = encode::serialize(&tx);
        Self {
            txid: tx.txid(),
            raw_hex: hex::encode(&raw),
            raw,
            tx,
        }
    }
}

/// How a not-yet-final input is spent
enum Spend {
    Multisig { nested: bool },
    Wpkh { nested: bool },
    Pkh,
    TaprootKey,
    Unsupported,
}

/// Finalizes signed bundles
#[derive(Debug, Clone)]
pub struct Finalizer {
    secp: Secp256k1<VerifyOnly>,
    events: Option<TransactionEventBus>,
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Finalizer {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
            events: None,
        }
    }

    /// Publish `FinalizationFailed` events on hard failures
    pub fn with_event_bus(mut self, events: TransactionEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Finalize every input that can be finalized
    ///
    /// # Returns
    /// * A summary of finalized, already final and pending inputs
    /// * `Finalization` error on the first multisig input that cannot be
    ///   finalized
    pub fn finalize(&self, psbt: &mut PartiallySignedTransaction) -> SpendResult<FinalizationSummary> {
        let mut summary = FinalizationSummary::default();

        for index in 0..psbt.inputs.len() {
            if is_final(&psbt.inputs[index]) {
                summary.already_final.push(index);
                continue;
            }

            let done = match classify(psbt, index) {
                Spend::Multisig { nested } => {
                    if let Err(e) = self.finalize_multisig_input(psbt, index, nested) {
                        if let Some(events) = &self.events {
                            events.publish(TransactionEvent::FinalizationFailed {
                                input_index: index,
                                reason: e.to_string(),
                            });
                        }
                        return Err(e);
                    }
                    true
                }
                Spend::Wpkh { nested } => finalize_wpkh_input(&mut psbt.inputs[index], nested),
                Spend::Pkh => finalize_pkh_input(&mut psbt.inputs[index]),
                Spend::TaprootKey => finalize_taproot_input(&mut psbt.inputs[index]),
                Spend::Unsupported => {
                    debug!("Input {} has a script this finalizer does not handle", index);
                    false
                }
            };

            if done {
                summary.finalized.push(index);
            } else {
                summary.pending.push(index);
            }
        }

        info!(
            "Finalized {} inputs ({} already final, {} pending)",
            summary.finalized.len(),
            summary.already_final.len(),
            summary.pending.len()
        );
        Ok(summary)
    }

    /// Build the witness of one P2WSH or P2SH-P2WSH multisig input
    fn finalize_multisig_input(
        &self,
        psbt: &mut PartiallySignedTransaction,
        index: usize,
        nested: bool,
    ) -> SpendResult<()> {
        let input = &psbt.inputs[index];
        let witness_script = input
            .witness_script
            .clone()
            .ok_or_else(|| SpendError::finalization(format!("input {} has no witness script", index)))?;

        let spent = spent_output(psbt, index).ok_or_else(|| {
            SpendError::finalization(format!("input {} does not carry the spent output", index))
        })?;
        let program = witness_script.to_v0_p2wsh();
        let commits = if nested {
            input.redeem_script.as_ref() == Some(&program)
                && spent.script_pubkey == program.to_p2sh()
        } else {
            spent.script_pubkey == program
        };
        if !commits {
            return Err(SpendError::finalization(format!(
                "witness script of input {} does not match the spent output",
                index
            )));
        }

        let multisig = parse_multisig_script(&witness_script).ok_or_else(|| {
            SpendError::finalization(format!("input {} witness script is not a valid multisig", index))
        })?;

        if input.partial_sigs.is_empty() {
            return Err(SpendError::finalization(format!("input {} has no signatures", index)));
        }

        let mut cache = SighashCache::new(&psbt.unsigned_tx);
        for (key, signature) in &input.partial_sigs {
            let verified = cache
                .segwit_signature_hash(index, &witness_script, spent.value, signature.hash_ty)
                .ok()
                .and_then(|sighash| Message::from_slice(&sighash[..]).ok())
                .map(|message| self.secp.verify_ecdsa(&message, &signature.sig, &key.inner).is_ok())
                .unwrap_or(false);
            if !verified {
                warn!("Signature on input {} does not verify for one of its keys", index);
            }
        }

        let mut ordered = Vec::with_capacity(multisig.required);
        for script_key in &multisig.keys {
            if let Some((_, signature)) = input.partial_sigs.iter().find(|(key, _)| key.inner == *script_key) {
                ordered.push(signature.to_vec());
            }
        }

        let discarded = input.partial_sigs.len() - ordered.len();
        if discarded > 0 {
            debug!(
                "Dropped {} signatures on input {} from keys not in its script",
                discarded, index
            );
        }
        if ordered.is_empty() {
            return Err(SpendError::finalization(format!(
                "no signature on input {} matches a key of its script",
                index
            )));
        }
        if ordered.len() != multisig.required {
            return Err(SpendError::finalization(format!(
                "input {} has {} matching signatures, {}-of-{} requires {}",
                index,
                ordered.len(),
                multisig.required,
                multisig.keys.len(),
                multisig.required
            )));
        }

        let mut stack: Vec<Vec<u8>> = Vec::with_capacity(multisig.required + 2);
        stack.push(Vec::new());
        stack.extend(ordered);
        stack.push(witness_script.to_bytes());

        let script_sig = if nested {
            Some(push_only(&[program.to_bytes()])?)
        } else {
            None
        };

        let input = &mut psbt.inputs[index];
        input.final_script_witness = Some(Witness::from_slice(&stack));
        input.final_script_sig = script_sig;
        clear_signing_fields(input);
        debug!("Input {} finalized with {} signatures", index, multisig.required);
        Ok(())
    }
}

/// Whether an input already carries its final scripts
fn is_final(input: &Input) -> bool {
    input.final_script_witness.is_some() || input.final_script_sig.is_some()
}

/// The output an input spends, from the witness or full previous transaction
fn spent_output(psbt: &PartiallySignedTransaction, index: usize) -> Option<TxOut> {
    let input = psbt.inputs.get(index)?;
    if let Some(output) = &input.witness_utxo {
        return Some(output.clone());
    }
    let vout = psbt.unsigned_tx.input.get(index)?.previous_output.vout as usize;
    input.non_witness_utxo.as_ref()?.output.get(vout).cloned()
}

fn classify(psbt: &PartiallySignedTransaction, index: usize) -> Spend {
    let input = &psbt.inputs[index];
    let Some(spent) = spent_output(psbt, index) else {
        return Spend::Unsupported;
    };
    let script = &spent.script_pubkey;
    let redeem = input.redeem_script.as_ref();

    if script.is_v0_p2wsh() {
        Spend::Multisig { nested: false }
    } else if script.is_v0_p2wpkh() {
        Spend::Wpkh { nested: false }
    } else if script.is_p2sh() && redeem.map_or(false, |r| r.is_v0_p2wsh()) {
        Spend::Multisig { nested: true }
    } else if script.is_p2sh() && redeem.map_or(false, |r| r.is_v0_p2wpkh()) {
        Spend::Wpkh { nested: true }
    } else if script.is_p2pkh() {
        Spend::Pkh
    } else if script.is_v1_p2tr() {
        Spend::TaprootKey
    } else {
        Spend::Unsupported
    }
}

fn finalize_wpkh_input(input: &mut Input, nested: bool) -> bool {
    let Some((key, signature)) = first_signature(input) else {
        return false;
    };
    let script_sig = if nested {
        let redeem = match &input.redeem_script {
            Some(redeem) => redeem.to_bytes(),
            None => return false,
        };
        match push_only(&[redeem]) {
            Ok(script) => Some(script),
            Err(_) => return false,
        }
    } else {
        None
    };

    input.final_script_witness = Some(Witness::from_slice(&[signature, key]));
    input.final_script_sig = script_sig;
    clear_signing_fields(input);
    true
}

fn finalize_pkh_input(input: &mut Input) -> bool {
    let Some((key, signature)) = first_signature(input) else {
        return false;
    };
    match push_only(&[signature, key]) {
        Ok(script_sig) => {
            input.final_script_sig = Some(script_sig);
            clear_signing_fields(input);
            true
        }
        Err(_) => false,
    }
}

fn finalize_taproot_input(input: &mut Input) -> bool {
    let Some(signature) = input.tap_key_sig else {
        return false;
    };
    input.final_script_witness = Some(Witness::from_slice(&[signature.to_vec()]));
    clear_signing_fields(input);
    true
}

/// The (serialized key, serialized signature) of a single-sig input
fn first_signature(input: &Input) -> Option<(Vec<u8>, Vec<u8>)> {
    input
        .partial_sigs
        .iter()
        .next()
        .map(|(key, signature)| (key.to_bytes(), signature.to_vec()))
}

fn push_only(items: &[Vec<u8>]) -> SpendResult<ScriptBuf> {
    let mut builder = Builder::new();
    for item in items {
        let bytes = PushBytesBuf::try_from(item.clone())
            .map_err(|_| SpendError::finalization("script push exceeds the size limit"))?;
        builder = builder.push_slice(bytes);
    }
    Ok(builder.into_script())
}

/// Drop everything a finalized input no longer needs
fn clear_signing_fields(input: &mut Input) {
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.tap_key_sig = None;
    input.tap_script_sigs.clear();
    input.tap_scripts.clear();
    input.tap_key_origins = BTreeMap::new();
    input.tap_internal_key = None;
    input.tap_merkle_root = None;
}

/// Extract a broadcastable transaction from a signed bundle or raw transaction
///
/// # Arguments
/// * `signed` - A base64 bundle, finalized or not, or a raw transaction in hex
///
/// # Returns
/// * `Finalization` error when any bundle input is still not final
/// * `Serialization` error when the input is neither format
pub fn extract_transaction(signed: &str) -> SpendResult<FinalizedTransaction> {
    Finalizer::new().extract(signed)
}

impl Finalizer {
    /// Extract with this finalizer, publishing its failure events
    pub fn extract(&self, signed: &str) -> SpendResult<FinalizedTransaction> {
        let trimmed = signed.trim();
        if trimmed.is_empty() {
            return Err(SpendError::validation("Signed transaction is empty"));
        }

        if trimmed.len() % 2 == 0 && trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            let bytes = hex::decode(trimmed).map_err(|e| SpendError::Serialization {
                context: format!("Invalid transaction hex: {}", e),
                source: Some(Box::new(e)),
            })?;
            let tx: Transaction = encode::deserialize(&bytes)?;
            debug!("Accepted raw transaction {}", short_txid(&tx.txid()));
            return Ok(FinalizedTransaction::new(tx));
        }

        let bytes = base64::decode(trimmed).map_err(|e| SpendError::Serialization {
            context: format!("Signed data is neither hex nor base64: {}", e),
            source: Some(Box::new(e)),
        })?;
        let mut psbt = PartiallySignedTransaction::deserialize(&bytes)?;
        let summary = self.finalize(&mut psbt)?;
        if !summary.is_complete() {
            return Err(SpendError::finalization(format!(
                "inputs {:?} are not finalized",
                summary.pending
            )));
        }

        let tx = psbt.extract_tx();
        info!("Extracted transaction {}", short_txid(&tx.txid()));
        Ok(FinalizedTransaction::new(tx))
    }
}
