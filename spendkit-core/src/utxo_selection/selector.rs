//! UTXO Selector implementation
//!
//! The selector is the entry point for choosing inputs. It filters a wallet's
//! UTXOs down to the eligible set, resolves explicitly requested UTXOs, and
//! dispatches to a strategy or to the send-max / subtract-fee settlements.
//!
//! # Eligibility
//!
//! A UTXO is eligible for automatic selection when it is not spent, not
//! frozen, has at least the configured number of confirmations, and is not
//! reserved by another draft. Explicit selection by id overrides reservations
//! but never spent or frozen flags.
//!
//! # Security Considerations
//!
//! - Selection reads the UTXO directory and never writes to it; reservation is
//!   the caller's concern
//! - Errors name outpoints and amounts, nothing else

use bitcoin::OutPoint;
use log::{debug, info};
use rust_decimal::Decimal;
use std::collections::HashSet;

use spendkit_common::error::{SpendError, SpendResult};

use crate::providers::UtxoDirectory;
use crate::utxo_selection::strategies::{self, base, largest_first};
use crate::utxo_selection::types::{Selection, SelectionMode, SelectionRequest, Utxo};

/// UTXO selector backed by a UTXO directory
pub struct UtxoSelector<'a> {
    directory: &'a dyn UtxoDirectory,
}

impl<'a> UtxoSelector<'a> {
    /// Create a selector reading from `directory`
    pub fn new(directory: &'a dyn UtxoDirectory) -> Self {
        Self { directory }
    }

    /// Eligible UTXOs of the requesting wallet, in directory order
    pub fn eligible(&self, request: &SelectionRequest) -> SpendResult<Vec<Utxo>> {
        let owner = request.lock_owner.as_deref();
        Ok(self
            .directory
            .utxos(&request.wallet_id)?
            .into_iter()
            .filter(|utxo| {
                utxo.is_spendable()
                    && utxo.confirmations >= request.confirmation_threshold
                    && !utxo.is_locked_for(owner)
            })
            .collect())
    }

    /// Select inputs for a request
    ///
    /// # Returns
    /// * `NoSpendableUtxos` if the eligible set is empty
    /// * `InsufficientFunds` if the chosen or eligible UTXOs fall short
    /// * `ResourceNotFound` / `Validation` for bad explicit ids
    pub fn select(&self, request: &SelectionRequest) -> SpendResult<Selection> {
        let params = &request.params;
        if params.fee_rate <= Decimal::ZERO {
            return Err(SpendError::validation("Fee rate must be positive"));
        }
        if request.mode != SelectionMode::SendMax && params.target == 0 {
            return Err(SpendError::validation("Amount must be greater than zero"));
        }

        let selection = match &request.explicit {
            Some(outpoints) => {
                let chosen = self.explicit(request, outpoints)?;
                debug!(
                    "Explicit selection of {} UTXOs for wallet {}",
                    chosen.len(),
                    request.wallet_id
                );
                match request.mode {
                    SelectionMode::Standard => base::settle(chosen, params)?,
                    SelectionMode::SendMax => base::send_max(chosen, params)?,
                    SelectionMode::SubtractFee => base::settle_subtract_fee(chosen, params)?,
                }
            }
            None => {
                let eligible = self.eligible(request)?;
                if eligible.is_empty() {
                    return Err(SpendError::NoSpendableUtxos {
                        wallet_id: request.wallet_id.clone(),
                    });
                }
                match request.mode {
                    SelectionMode::SendMax => base::send_max(eligible, params)?,
                    SelectionMode::SubtractFee => {
                        base::cover_nominal(largest_first::sort_descending(&eligible), params)?
                    }
                    SelectionMode::Standard => {
                        let strategy = strategies::for_strategy(request.strategy)?;
                        debug!("Selecting with strategy {}", strategy.name());
                        strategy.select(&eligible, params)?
                    }
                }
            }
        };

        info!(
            "Selected {} inputs ({} sats) for wallet {}: fee {} sats, change {} sats",
            selection.input_count(),
            selection.total_input,
            request.wallet_id,
            selection.fee,
            selection.change
        );
        Ok(selection)
    }

    /// Resolve explicitly requested outpoints into spendable UTXOs
    fn explicit(&self, request: &SelectionRequest, outpoints: &[OutPoint]) -> SpendResult<Vec<Utxo>> {
        if outpoints.is_empty() {
            return Err(SpendError::validation("Explicit UTXO selection is empty"));
        }

        let mut seen = HashSet::new();
        let mut chosen = Vec::with_capacity(outpoints.len());
        for outpoint in outpoints {
            if !seen.insert(*outpoint) {
                return Err(SpendError::validation(format!(
                    "UTXO {} was selected more than once",
                    outpoint
                )));
            }

            let utxo = self
                .directory
                .find(&request.wallet_id, outpoint)?
                .ok_or_else(|| SpendError::not_found("UTXO", outpoint.to_string()))?;

            if utxo.spent {
                return Err(SpendError::validation(format!("UTXO {} is already spent", outpoint)));
            }
            if utxo.frozen {
                return Err(SpendError::validation(format!("UTXO {} is frozen", outpoint)));
            }
            if utxo.confirmations < request.confirmation_threshold {
                return Err(SpendError::validation(format!(
                    "UTXO {} has {} confirmations, {} required",
                    outpoint, utxo.confirmations, request.confirmation_threshold
                )));
            }
            chosen.push(utxo);
        }
        Ok(chosen)
    }
}
