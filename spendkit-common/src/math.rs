//! Fee and size estimation for transaction construction
//!
//! Sizes are estimated from fixed per-script-type constants rather than from a
//! fully built transaction, because the selector needs a fee figure for every
//! candidate input set before anything is assembled.
//!
//! Fee rates are carried as `rust_decimal::Decimal` sat/vB so fractional rates
//! multiply exactly. Fees always round up: the estimate may overpay by less than
//! one satoshi, it never underpays.
//!
//! ```
//! use rust_decimal_macros::dec;
//! use spendkit_common::math::{calculate_fee, estimate_size};
//! use spendkit_common::types::ScriptType;
//!
//! let vbytes = estimate_size(1, 2, ScriptType::NativeSegwit);
//! assert_eq!(vbytes, 146);
//! assert_eq!(calculate_fee(vbytes, dec!(10)), 1_460);
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{SpendError, SpendResult};
use crate::types::ScriptType;

/// Fixed transaction overhead (version, locktime, counts)
pub const TX_OVERHEAD_VBYTES: u64 = 10;

/// Size of one output in vbytes
pub const OUTPUT_VBYTES: u64 = 34;

/// Approximate size of one input of the given script type in vbytes
pub fn input_vbytes(script_type: ScriptType) -> u64 {
    match script_type {
        ScriptType::Legacy => 148,
        ScriptType::NestedSegwit => 91,
        ScriptType::NativeSegwit => 68,
        ScriptType::Taproot => 58,
    }
}

/// Estimate the virtual size of a transaction
///
/// # Arguments
/// * `inputs` - Number of inputs
/// * `outputs` - Number of outputs
/// * `script_type` - Script type of the spent inputs
///
/// # Returns
/// The estimated size in vbytes
pub fn estimate_size(inputs: usize, outputs: usize, script_type: ScriptType) -> u64 {
    TX_OVERHEAD_VBYTES + inputs as u64 * input_vbytes(script_type) + outputs as u64 * OUTPUT_VBYTES
}

/// Calculate the fee for a transaction of `vbytes` at `fee_rate` sat/vB
///
/// The result is `ceil(vbytes * fee_rate)`. Non-positive rates yield zero.
pub fn calculate_fee(vbytes: u64, fee_rate: Decimal) -> u64 {
    if fee_rate <= Decimal::ZERO {
        return 0;
    }
    (Decimal::from(vbytes) * fee_rate)
        .ceil()
        .to_u64()
        .unwrap_or(u64::MAX)
}

/// Size and fee in one step
pub fn estimate_fee(inputs: usize, outputs: usize, script_type: ScriptType, fee_rate: Decimal) -> u64 {
    calculate_fee(estimate_size(inputs, outputs, script_type), fee_rate)
}

/// Check that a requested fee rate is usable
///
/// # Arguments
/// * `fee_rate` - Requested fee rate in sat/vB
/// * `max_fee_rate` - Sanity cap from the engine settings
pub fn validate_fee_rate(fee_rate: Decimal, max_fee_rate: Decimal) -> SpendResult<()> {
    if fee_rate <= Decimal::ZERO {
        return Err(SpendError::validation(format!(
            "Fee rate must be positive, got {} sat/vB",
            fee_rate
        )));
    }
    if fee_rate > max_fee_rate {
        return Err(SpendError::validation(format!(
            "Fee rate {} sat/vB exceeds the maximum of {} sat/vB",
            fee_rate, max_fee_rate
        )));
    }
    Ok(())
}

/// Determines if an amount is below the dust threshold
pub fn is_dust_amount(amount_sats: u64, dust_threshold: u64) -> bool {
    amount_sats < dust_threshold
}

/// Effective fee rate of a fee paid for `vbytes`, rounded to 2 decimal places
pub fn effective_fee_rate(fee_sats: u64, vbytes: u64) -> Option<Decimal> {
    if vbytes == 0 {
        return None;
    }
    Some((Decimal::from(fee_sats) / Decimal::from(vbytes)).round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn size_uses_per_type_input_constants() {
        assert_eq!(estimate_size(1, 1, ScriptType::Legacy), 10 + 148 + 34);
        assert_eq!(estimate_size(1, 1, ScriptType::NestedSegwit), 10 + 91 + 34);
        assert_eq!(estimate_size(1, 1, ScriptType::NativeSegwit), 10 + 68 + 34);
        assert_eq!(estimate_size(1, 1, ScriptType::Taproot), 10 + 58 + 34);
        assert_eq!(estimate_size(0, 0, ScriptType::Taproot), TX_OVERHEAD_VBYTES);
    }

    #[test]
    fn fee_rounds_up() {
        assert_eq!(calculate_fee(150, dec!(1.1)), 165);
        assert_eq!(calculate_fee(146, dec!(1.01)), 148);
        assert_eq!(calculate_fee(3, dec!(0.5)), 2);
        assert_eq!(calculate_fee(100, dec!(0)), 0);
    }

    #[test]
    fn fee_rate_bounds() {
        assert!(validate_fee_rate(dec!(0), dec!(1000)).is_err());
        assert!(validate_fee_rate(dec!(-1), dec!(1000)).is_err());
        assert!(validate_fee_rate(dec!(1001), dec!(1000)).is_err());
        assert!(validate_fee_rate(dec!(12.5), dec!(1000)).is_ok());
    }

    #[test]
    fn effective_rate() {
        assert_eq!(effective_fee_rate(1_460, 146), Some(dec!(10)));
        assert_eq!(effective_fee_rate(1, 0), None);
    }
}
