//! Transaction Assembler
//!
//! Turns a spend request into an unsigned bundle for external signing.
//!
//! # Pipeline
//!
//! 1. Load settings and the wallet, validate the request and destinations
//! 2. Select inputs for the requested mode
//! 3. Plan change: one output, or randomized decoy outputs when requested
//!    and affordable
//! 4. Fetch previous transactions for legacy inputs
//! 5. Shuffle the outputs
//! 6. Build the bundle with per-input and change-output signer metadata
//! 7. Check conservation and report
//!
//! Derivation metadata is best-effort; every other failure aborts the build
//! before anything is handed out.
//!
//! # Security Considerations
//!
//! - The assembler never sees private keys and never signs
//! - Output order is randomized so position does not reveal change
//! - Addresses and txids are truncated in logs

mod metadata;
pub mod types;

use bitcoin::absolute::LockTime;
use bitcoin::address::NetworkUnchecked;
use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use spendkit_common::config::{EngineSettings, SettingsStore};
use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::events::{TransactionEvent, TransactionEventBus};
use spendkit_common::logging::sanitize_for_logging;
use spendkit_common::math::{self, validate_fee_rate};
use spendkit_common::types::{Wallet, WalletAddress};

use crate::decoy::{generate_decoy_amounts, is_valid_decoy_count, MAX_DECOYS, MIN_DECOYS};
use crate::derivation::path::normalize_path;
use crate::derivation::resolver::KeyResolver;
use crate::prev_tx::fetch_previous_transactions;
use crate::providers::{load_wallet, ChainSource, UtxoDirectory, WalletDirectory};
use crate::utxo_selection::types::{Selection, SelectionMode, SelectionParams, SelectionRequest};
use crate::utxo_selection::UtxoSelector;

use metadata::{apply_to_input, apply_to_output, signer_metadata};
pub use types::{
    BuildRequest, BuildResult, BuiltInput, BuiltOutput, DecoyInfo, OutputKind, Recipient,
};

/// Decode an address and require it to belong to `network`
pub fn parse_address(address: &str, network: Network) -> SpendResult<Address> {
    address
        .trim()
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| {
            SpendError::InvalidAddress(format!("{}: {}", sanitize_for_logging(address), e))
        })?
        .require_network(network)
        .map_err(|_| {
            SpendError::InvalidAddress(format!(
                "{} is not a {} address",
                sanitize_for_logging(address),
                network
            ))
        })
}

/// An output before shuffling
struct PlannedOutput {
    address: Address,
    amount: u64,
    kind: OutputKind,
    /// Wallet record of change and decoy addresses
    record: Option<WalletAddress>,
}

/// Change outputs and the fee they imply
struct ChangePlan {
    outputs: Vec<PlannedOutput>,
    fee: u64,
    decoy: Option<DecoyInfo>,
}

/// Builds unsigned bundles from the wallet, UTXO and chain collaborators
pub struct TransactionAssembler {
    wallets: Arc<dyn WalletDirectory>,
    utxos: Arc<dyn UtxoDirectory>,
    chain: Arc<dyn ChainSource>,
    settings: Arc<dyn SettingsStore>,
    events: Option<TransactionEventBus>,
}

impl TransactionAssembler {
    pub fn new(
        wallets: Arc<dyn WalletDirectory>,
        utxos: Arc<dyn UtxoDirectory>,
        chain: Arc<dyn ChainSource>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            wallets,
            utxos,
            chain,
            settings,
            events: None,
        }
    }

    /// Publish a `Built` event after every successful build
    pub fn with_event_bus(mut self, events: TransactionEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build with process-local randomness
    pub fn build(&self, request: &BuildRequest) -> SpendResult<BuildResult> {
        self.build_with_rng(request, &mut rand::rng())
    }

    /// Build with a caller-supplied random source for shuffling and decoys
    pub fn build_with_rng<R: Rng>(&self, request: &BuildRequest, rng: &mut R) -> SpendResult<BuildResult> {
        let settings = self.settings.load()?;
        let wallet = load_wallet(self.wallets.as_ref(), &request.wallet_id)?;
        validate_fee_rate(request.fee_rate, settings.max_fee_rate)?;
        let destinations = validate_request(request, &wallet, &settings)?;
        let resolver = KeyResolver::for_wallet(&wallet)?;

        debug!(
            "Building for wallet {} ({} recipients, mode {:?}, strategy {})",
            wallet.id,
            destinations.len(),
            request.mode,
            request.strategy
        );

        // Selection
        let target = match request.mode {
            SelectionMode::SendMax => 0,
            _ => request
                .requested_total()
                .ok_or_else(|| SpendError::validation("Recipient amounts overflow"))?,
        };
        let params = SelectionParams {
            target,
            fee_rate: request.fee_rate,
            script_type: wallet.script_type,
            recipient_count: destinations.len(),
            dust_threshold: settings.dust_threshold,
        };
        let selection = UtxoSelector::new(self.utxos.as_ref()).select(&SelectionRequest {
            wallet_id: wallet.id.clone(),
            params: params.clone(),
            strategy: request.strategy,
            mode: request.mode,
            explicit: request.utxo_ids.clone(),
            confirmation_threshold: settings.confirmation_threshold,
            lock_owner: request.lock_owner.clone(),
        })?;

        // Recipients and change
        let mut planned: Vec<PlannedOutput> = match request.mode {
            SelectionMode::Standard => destinations
                .into_iter()
                .zip(&request.recipients)
                .map(|(address, recipient)| PlannedOutput {
                    address,
                    amount: recipient.amount,
                    kind: OutputKind::Recipient,
                    record: None,
                })
                .collect(),
            SelectionMode::SendMax | SelectionMode::SubtractFee => destinations
                .into_iter()
                .map(|address| PlannedOutput {
                    address,
                    amount: selection.recipient_amount,
                    kind: OutputKind::Recipient,
                    record: None,
                })
                .collect(),
        };
        let effective_amount = selection.recipient_amount;

        let change = self.plan_change(request, &wallet, &params, &selection, rng)?;
        let fee = change.fee;
        let decoy = change.decoy;
        planned.extend(change.outputs);

        // Single change output, reported as such; decoys stay anonymous
        let (change_address, change_amount) = match (&decoy, planned.iter().find(|o| o.kind == OutputKind::Change)) {
            (None, Some(output)) => (Some(output.address.to_string()), output.amount),
            _ => (None, 0),
        };

        planned.shuffle(rng);

        // Inputs
        let prev_txs = if wallet.script_type.is_segwit() {
            HashMap::new()
        } else {
            let txids: Vec<_> = selection.selected.iter().map(|u| u.outpoint.txid).collect();
            fetch_previous_transactions(
                self.chain.as_ref(),
                &txids,
                settings.prev_tx_fetch_concurrency,
            )?
        };

        let rbf = request.enable_rbf.unwrap_or(settings.enable_rbf);
        let sequence = if rbf {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::MAX
        };

        let unsigned = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: selection
                .selected
                .iter()
                .map(|utxo| TxIn {
                    previous_output: utxo.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::default(),
                })
                .collect(),
            output: planned
                .iter()
                .map(|output| TxOut {
                    value: output.amount,
                    script_pubkey: output.address.script_pubkey(),
                })
                .collect(),
        };
        let mut psbt = PartiallySignedTransaction::from_unsigned_tx(unsigned)?;

        let addresses = self.wallets.addresses(&wallet.id)?;
        let paths: HashMap<&str, &str> = addresses
            .iter()
            .map(|record| (record.address.as_str(), record.derivation_path.as_str()))
            .collect();
        let multisig = wallet.is_multisig();

        let mut inputs = Vec::with_capacity(selection.selected.len());
        for (utxo, psbt_input) in selection.selected.iter().zip(psbt.inputs.iter_mut()) {
            if wallet.script_type.is_segwit() {
                psbt_input.witness_utxo = Some(TxOut {
                    value: utxo.amount,
                    script_pubkey: utxo.script_pubkey.clone(),
                });
            } else {
                psbt_input.non_witness_utxo =
                    Some(previous_transaction(&prev_txs, utxo.outpoint, utxo.amount)?);
            }

            let path = paths.get(utxo.address.as_str()).copied();
            let metadata = signer_metadata(&resolver, wallet.script_type, path, &utxo.script_pubkey);
            apply_to_input(psbt_input, &metadata, wallet.script_type, multisig);

            inputs.push(BuiltInput {
                outpoint: utxo.outpoint,
                amount: utxo.amount,
                address: utxo.address.clone(),
                derivation_path: path.and_then(|p| normalize_path(p).ok()),
                derivation: metadata.derivation,
                witness_script: metadata.witness_script,
            });
        }

        // Outputs
        let mut outputs = Vec::with_capacity(planned.len());
        for (output, psbt_output) in planned.iter().zip(psbt.outputs.iter_mut()) {
            if let Some(record) = &output.record {
                let script_pubkey = output.address.script_pubkey();
                let metadata = signer_metadata(
                    &resolver,
                    wallet.script_type,
                    Some(record.derivation_path.as_str()),
                    &script_pubkey,
                );
                apply_to_output(psbt_output, &metadata, wallet.script_type, multisig);
            }
            outputs.push(BuiltOutput {
                address: output.address.to_string(),
                amount: output.amount,
                kind: output.kind,
            });
        }

        // Conservation
        let total_input = selection.total_input;
        let total_output: u64 = psbt.unsigned_tx.output.iter().map(|o| o.value).sum();
        if total_output.checked_add(fee) != Some(total_input) {
            return Err(SpendError::validation(format!(
                "Transaction does not balance: inputs {} sats, outputs {} sats, fee {} sats",
                total_input, total_output, fee
            )));
        }

        let attached = inputs.iter().filter(|i| i.derivation.is_attached()).count();
        if attached < inputs.len() {
            warn!(
                "Signer metadata attached to {} of {} inputs",
                attached,
                inputs.len()
            );
        }
        info!(
            "Built transaction for wallet {}: {} inputs, {} outputs, fee {} sats",
            wallet.id,
            inputs.len(),
            outputs.len(),
            fee
        );

        if let Some(events) = &self.events {
            events.publish(TransactionEvent::Built {
                wallet_id: wallet.id.clone(),
                input_count: inputs.len(),
                output_count: outputs.len(),
                fee,
            });
        }

        let psbt_base64 = base64::encode(psbt.serialize());
        Ok(BuildResult {
            psbt,
            psbt_base64,
            inputs,
            outputs,
            fee,
            total_input,
            total_output,
            change_address,
            change_amount,
            effective_amount,
            decoy,
            rbf,
        })
    }

    /// Turn the selection's leftover into change outputs
    ///
    /// Decoys are used when requested, when the change still covers the dust
    /// floor of every decoy after paying for the extra outputs, and when the
    /// wallet has enough unused change addresses. Otherwise one change output
    /// carries the leftover.
    fn plan_change<R: Rng>(
        &self,
        request: &BuildRequest,
        wallet: &Wallet,
        params: &SelectionParams,
        selection: &Selection,
        rng: &mut R,
    ) -> SpendResult<ChangePlan> {
        if selection.change == 0 {
            return Ok(ChangePlan {
                outputs: Vec::new(),
                fee: selection.fee,
                decoy: None,
            });
        }

        if let Some(count) = request.decoy_count {
            if let Some(plan) = self.plan_decoys(wallet, params, selection, count, rng)? {
                return Ok(plan);
            }
        }

        let record = self
            .wallets
            .unused_change_addresses(&wallet.id, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                SpendError::validation(format!("Wallet {} has no unused change address", wallet.id))
            })?;
        let address = parse_address(&record.address, wallet.network)?;
        Ok(ChangePlan {
            outputs: vec![PlannedOutput {
                address,
                amount: selection.change,
                kind: OutputKind::Change,
                record: Some(record),
            }],
            fee: selection.fee,
            decoy: None,
        })
    }

    fn plan_decoys<R: Rng>(
        &self,
        wallet: &Wallet,
        params: &SelectionParams,
        selection: &Selection,
        count: usize,
        rng: &mut R,
    ) -> SpendResult<Option<ChangePlan>> {
        let inputs = selection.input_count();
        let with_one = math::estimate_fee(inputs, params.recipient_count + 1, params.script_type, params.fee_rate);
        let with_decoys =
            math::estimate_fee(inputs, params.recipient_count + count, params.script_type, params.fee_rate);
        let extra = with_decoys.saturating_sub(with_one);

        let floor = params.dust_threshold.saturating_mul(count as u64);
        let available = match selection.change.checked_sub(extra) {
            Some(available) if available > floor => available,
            _ => {
                debug!(
                    "Change of {} sats cannot fund {} decoys, using a single change output",
                    selection.change, count
                );
                return Ok(None);
            }
        };

        let records = self.wallets.unused_change_addresses(&wallet.id, count)?;
        if records.len() < count {
            warn!(
                "Wallet {} has {} unused change addresses, {} decoys requested",
                wallet.id,
                records.len(),
                count
            );
            return Ok(None);
        }

        let Some(amounts) = generate_decoy_amounts(available, count, params.dust_threshold, rng) else {
            return Ok(None);
        };

        let primary_change_address = records[0].address.clone();
        let mut outputs = Vec::with_capacity(count);
        for (record, amount) in records.into_iter().zip(amounts) {
            outputs.push(PlannedOutput {
                address: parse_address(&record.address, wallet.network)?,
                amount,
                kind: OutputKind::Decoy,
                record: Some(record),
            });
        }

        debug!("Split {} sats of change into {} decoys", available, count);
        Ok(Some(ChangePlan {
            outputs,
            fee: selection.fee + extra,
            decoy: Some(DecoyInfo {
                count,
                primary_change_address,
            }),
        }))
    }
}

/// Check the request shape and decode every destination
fn validate_request(
    request: &BuildRequest,
    wallet: &Wallet,
    settings: &EngineSettings,
) -> SpendResult<Vec<Address>> {
    if request.recipients.is_empty() {
        return Err(SpendError::validation("At least one recipient is required"));
    }
    if request.mode != SelectionMode::Standard && request.recipients.len() != 1 {
        return Err(SpendError::validation(format!(
            "{:?} mode takes exactly one recipient, got {}",
            request.mode,
            request.recipients.len()
        )));
    }
    if let Some(count) = request.decoy_count {
        if !is_valid_decoy_count(count) {
            return Err(SpendError::validation(format!(
                "Decoy count must be between {} and {}, got {}",
                MIN_DECOYS, MAX_DECOYS, count
            )));
        }
    }

    let mut destinations = Vec::with_capacity(request.recipients.len());
    for recipient in &request.recipients {
        if request.mode != SelectionMode::SendMax {
            if recipient.amount == 0 {
                return Err(SpendError::validation("Amount must be greater than zero"));
            }
            if math::is_dust_amount(recipient.amount, settings.dust_threshold) {
                return Err(SpendError::validation(format!(
                    "Amount {} sats is below the dust threshold of {} sats",
                    recipient.amount, settings.dust_threshold
                )));
            }
        }
        destinations.push(parse_address(&recipient.address, wallet.network)?);
    }
    Ok(destinations)
}

fn previous_transaction(
    prev_txs: &HashMap<bitcoin::Txid, Transaction>,
    outpoint: OutPoint,
    amount: u64,
) -> SpendResult<Transaction> {
    let tx = prev_txs.get(&outpoint.txid).ok_or_else(|| {
        SpendError::transport(format!("previous transaction {} was not fetched", outpoint.txid))
    })?;
    match tx.output.get(outpoint.vout as usize) {
        Some(output) if output.value == amount => Ok(tx.clone()),
        Some(output) => Err(SpendError::validation(format!(
            "UTXO {} is recorded as {} sats, previous transaction says {} sats",
            outpoint, amount, output.value
        ))),
        None => Err(SpendError::validation(format!(
            "Previous transaction {} has no output {}",
            outpoint.txid, outpoint.vout
        ))),
    }
}
