//! Shared settlement logic for the selection strategies
//!
//! Strategies only decide the order in which UTXOs are considered. Turning a
//! set of inputs into recipient amount, change and fee happens here, so every
//! strategy and mode follows the same dust and conservation rules.

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::math;

use crate::utxo_selection::types::{total_value, Selection, SelectionParams, Utxo};

/// Fee for `inputs` inputs and `outputs` outputs under `params`
pub fn fee_for(params: &SelectionParams, inputs: usize, outputs: usize) -> u64 {
    math::estimate_fee(inputs, outputs, params.script_type, params.fee_rate)
}

/// Accumulate UTXOs in the given order until they cover target + fee
///
/// The fee is recomputed after every added input, assuming one change output
/// on top of the recipients. If the whole list is consumed without reaching
/// that bound, the set is settled without change (or rejected).
pub fn accumulate(ordered: Vec<Utxo>, params: &SelectionParams) -> SpendResult<Selection> {
    let mut selected = Vec::with_capacity(ordered.len());
    let mut total: u64 = 0;

    for utxo in ordered {
        total = total.saturating_add(utxo.amount);
        selected.push(utxo);

        let fee = fee_for(params, selected.len(), params.recipient_count + 1);
        if total >= params.target.saturating_add(fee) {
            return settle(selected, params);
        }
    }

    settle(selected, params)
}

/// Settle a fixed input set for a standard send
///
/// # Returns
/// * A selection with one change output if the leftover reaches the dust
///   threshold, otherwise a change-less selection that gives the leftover to
///   the fee
/// * `InsufficientFunds` if the inputs cannot pay the recipients and the
///   change-less fee
pub fn settle(selected: Vec<Utxo>, params: &SelectionParams) -> SpendResult<Selection> {
    let total = total_value(&selected);
    let inputs = selected.len();

    let fee_with_change = fee_for(params, inputs, params.recipient_count + 1);
    if let Some(change) = total.checked_sub(params.target.saturating_add(fee_with_change)) {
        if !math::is_dust_amount(change, params.dust_threshold) {
            return Selection::balanced(selected, params.target, change, fee_with_change);
        }
    }

    let fee_without_change = fee_for(params, inputs, params.recipient_count);
    let required = params.target.saturating_add(fee_without_change);
    if total < required {
        return Err(SpendError::InsufficientFunds {
            required,
            available: total,
        });
    }

    // Leftover below dust is not worth an output
    Selection::balanced(selected, params.target, 0, total - params.target)
}

/// Spend every UTXO to a single output, fee deducted from the total
pub fn send_max(selected: Vec<Utxo>, params: &SelectionParams) -> SpendResult<Selection> {
    let total = total_value(&selected);
    let fee = fee_for(params, selected.len(), 1);

    match total.checked_sub(fee) {
        Some(amount) if !math::is_dust_amount(amount, params.dust_threshold) => {
            Selection::balanced(selected, amount, 0, fee)
        }
        _ => Err(SpendError::InsufficientFunds {
            required: fee.saturating_add(params.dust_threshold),
            available: total,
        }),
    }
}

/// Take UTXOs in the given order until they cover the nominal amount alone
pub fn cover_nominal(ordered: Vec<Utxo>, params: &SelectionParams) -> SpendResult<Selection> {
    let mut selected = Vec::new();
    let mut total: u64 = 0;

    for utxo in ordered {
        if total >= params.target {
            break;
        }
        total = total.saturating_add(utxo.amount);
        selected.push(utxo);
    }

    settle_subtract_fee(selected, params)
}

/// Settle a fixed input set whose fee is deducted from the recipient amount
pub fn settle_subtract_fee(selected: Vec<Utxo>, params: &SelectionParams) -> SpendResult<Selection> {
    let total = total_value(&selected);
    if total < params.target {
        return Err(SpendError::InsufficientFunds {
            required: params.target,
            available: total,
        });
    }

    let inputs = selected.len();
    let leftover = total - params.target;
    let (fee, change) = if math::is_dust_amount(leftover, params.dust_threshold) {
        (fee_for(params, inputs, 1) + leftover, 0)
    } else {
        (fee_for(params, inputs, 2), leftover)
    };

    let network_fee = fee - (total - params.target - change);
    let recipient_amount = params
        .target
        .checked_sub(network_fee)
        .filter(|amount| !math::is_dust_amount(*amount, params.dust_threshold))
        .ok_or_else(|| {
            SpendError::validation(format!(
                "Amount {} sats cannot cover the fee of {} sats and stay above dust ({} sats)",
                params.target, network_fee, params.dust_threshold
            ))
        })?;

    Selection::balanced(selected, recipient_amount, change, fee)
}
