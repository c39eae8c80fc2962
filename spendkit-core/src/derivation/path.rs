//! Derivation path normalization
//!
//! Paths arrive from address records, device registrations and descriptors in
//! several notations (`84h/0h/0h`, `m/84'/0'/0'`, `M/84H/0H/0H`). Hardware
//! signers silently ignore metadata whose path they do not recognize, so every
//! path is rewritten to one canonical form, `m/84'/0'/0'/1/7`, before use.

use bitcoin::bip32::{ChildNumber, DerivationPath};
use std::str::FromStr;

use spendkit_common::error::{SpendError, SpendResult};

/// First hardened child index
const HARDENED_OFFSET: u32 = 1 << 31;

/// Rewrite a derivation path into canonical `m/...'` notation
///
/// # Arguments
/// * `path` - Path with or without the `m/` prefix, hardened steps marked with
///   `'`, `h` or `H`
///
/// # Returns
/// * The canonical path string, `m` for the master key
pub fn normalize_path(path: &str) -> SpendResult<String> {
    let trimmed = path.trim();
    let body = trimmed
        .strip_prefix("m/")
        .or_else(|| trimmed.strip_prefix("M/"))
        .unwrap_or(trimmed);

    if body.is_empty() || body == "m" || body == "M" {
        return Ok("m".to_string());
    }

    let mut canonical = String::from("m");
    for step in body.split('/') {
        let (digits, hardened) = match step.strip_suffix(|c: char| c == '\'' || c == 'h' || c == 'H') {
            Some(digits) => (digits, true),
            None => (step, false),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SpendError::derivation(format!(
                "Invalid derivation step '{}' in path {}",
                step, trimmed
            )));
        }
        let index: u32 = digits.parse().map_err(|_| {
            SpendError::derivation(format!("Derivation index {} out of range", digits))
        })?;
        if index >= HARDENED_OFFSET {
            return Err(SpendError::derivation(format!(
                "Derivation index {} out of range",
                index
            )));
        }

        canonical.push('/');
        canonical.push_str(&index.to_string());
        if hardened {
            canonical.push('\'');
        }
    }
    Ok(canonical)
}

/// Parse a path in any accepted notation
pub fn parse_path(path: &str) -> SpendResult<DerivationPath> {
    let canonical = normalize_path(path)?;
    DerivationPath::from_str(&canonical).map_err(SpendError::from)
}

/// The trailing unhardened (change, index) pair of a full address path
pub fn change_and_index(path: &DerivationPath) -> Option<(ChildNumber, ChildNumber)> {
    let steps: &[ChildNumber] = path.as_ref();
    match steps {
        [.., change @ ChildNumber::Normal { .. }, index @ ChildNumber::Normal { .. }] => {
            Some((*change, *index))
        }
        _ => None,
    }
}

/// The two unhardened steps `change/index`
pub fn child_steps(change: u32, index: u32) -> SpendResult<[ChildNumber; 2]> {
    Ok([
        ChildNumber::from_normal_idx(change)?,
        ChildNumber::from_normal_idx(index)?,
    ])
}
