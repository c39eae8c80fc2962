//! Output descriptor parsing
//!
//! Wallets store their script policy as an output descriptor. The engine needs
//! three things from it: the quorum, the exact script flavor, and the ordered
//! cosigner keys with their origins. Parsing is a pure function of the
//! descriptor string; callers that parse repeatedly may memoize the result.
//!
//! Supported forms:
//!
//! - `wsh(sortedmulti(M,K1,...,Kn))` (P2WSH)
//! - `sh(wsh(sortedmulti(M,K1,...,Kn)))` (P2SH-P2WSH)
//! - `sh(sortedmulti(M,K1,...,Kn))` (P2SH)
//! - `wpkh(K)`, `sh(wpkh(K))`, `pkh(K)`, `tr(K)` (single key)
//!
//! Each key is `[fingerprint/account/path]xpub/<suffix>`. The origin is optional
//! and the child suffix (`/0/*`, `/<0;1>/*`) is ignored: the engine derives
//! change and index steps itself. An optional `#checksum` is verified.
//! SLIP-132 keys (`zpub`, `Vpub`, ...) are rewritten to `xpub`/`tpub` before the
//! string is handed to miniscript.

use std::str::FromStr;

use bdk::miniscript::descriptor::{DescriptorPublicKey, ShInner, WshInner};
use bdk::miniscript::Descriptor;
use bitcoin::bip32::{DerivationPath, ExtendedPubKey, Fingerprint};
use log::debug;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::logging::sanitize_for_logging;
use spendkit_common::types::ScriptType;

use super::xpub::to_standard_string;

/// Largest cosigner count accepted in a sorted multisig
pub const MAX_COSIGNERS: usize = 15;

/// One key of a descriptor, with its origin when the descriptor records it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosignerKey {
    /// Master key fingerprint
    pub fingerprint: Option<Fingerprint>,
    /// Account-level derivation path from the master key
    pub account_path: Option<DerivationPath>,
    /// Account-level extended public key
    pub xpub: ExtendedPubKey,
}

/// M-of-N quorum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quorum {
    pub required: usize,
    pub total: usize,
}

/// A parsed sorted-multisig descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigDescriptor {
    pub quorum: Quorum,
    /// `Legacy` = P2SH, `NestedSegwit` = P2SH-P2WSH, `NativeSegwit` = P2WSH
    pub script_type: ScriptType,
    /// Cosigners in declaration order
    pub cosigners: Vec<CosignerKey>,
}

/// A parsed single-key descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleKeyDescriptor {
    pub script_type: ScriptType,
    pub key: CosignerKey,
}

/// A parsed wallet descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletDescriptor {
    Single(SingleKeyDescriptor),
    Multi(MultisigDescriptor),
}

/// Parse a wallet descriptor
pub fn parse_descriptor(descriptor: &str) -> SpendResult<WalletDescriptor> {
    let body = verify_checksum(descriptor)?;
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let standard = standardize_keys(&compact)?;

    let parsed = Descriptor::<DescriptorPublicKey>::from_str(&standard).map_err(|e| {
        debug!(
            "Descriptor rejected by miniscript: {}",
            sanitize_for_logging(&e.to_string())
        );
        SpendError::validation("Descriptor is not a valid output descriptor")
    })?;

    match parsed {
        Descriptor::Wsh(wsh) => match wsh.as_inner() {
            WshInner::SortedMulti(multi) => {
                sortedmulti(multi.k, &multi.pks, ScriptType::NativeSegwit)
            }
            WshInner::Ms(_) => Err(only_sortedmulti()),
        },
        Descriptor::Sh(sh) => match sh.as_inner() {
            ShInner::Wsh(wsh) => match wsh.as_inner() {
                WshInner::SortedMulti(multi) => {
                    sortedmulti(multi.k, &multi.pks, ScriptType::NestedSegwit)
                }
                WshInner::Ms(_) => Err(only_sortedmulti()),
            },
            ShInner::SortedMulti(multi) => sortedmulti(multi.k, &multi.pks, ScriptType::Legacy),
            ShInner::Wpkh(wpkh) => single(ScriptType::NestedSegwit, wpkh.as_inner()),
            ShInner::Ms(_) => Err(only_sortedmulti()),
        },
        Descriptor::Wpkh(wpkh) => single(ScriptType::NativeSegwit, wpkh.as_inner()),
        Descriptor::Pkh(pkh) => single(ScriptType::Legacy, pkh.as_inner()),
        Descriptor::Tr(tr) if tr.taptree().is_some() => Err(SpendError::validation(
            "Taproot descriptors with script trees are not supported",
        )),
        Descriptor::Tr(tr) => single(ScriptType::Taproot, tr.internal_key()),
        _ => Err(SpendError::validation("Unsupported descriptor form")),
    }
}

/// Parse a descriptor that must describe a sorted multisig
pub fn parse_multisig_descriptor(descriptor: &str) -> SpendResult<MultisigDescriptor> {
    match parse_descriptor(descriptor)? {
        WalletDescriptor::Multi(multi) => Ok(multi),
        WalletDescriptor::Single(_) => Err(SpendError::validation(
            "Expected a multisig descriptor, found a single-key descriptor",
        )),
    }
}

/// Strip and check an optional `#checksum` suffix
fn verify_checksum(descriptor: &str) -> SpendResult<&str> {
    let trimmed = descriptor.trim();
    let Some((body, checksum)) = trimmed.rsplit_once('#') else {
        return Ok(trimmed);
    };

    let expected = bdk::descriptor::calc_checksum(body)
        .map_err(|e| SpendError::validation(format!("Descriptor checksum failed: {}", e)))?;
    if expected != checksum {
        return Err(SpendError::validation(format!(
            "Descriptor checksum mismatch: expected {}, found {}",
            expected, checksum
        )));
    }
    Ok(body)
}

const SLIP132_PREFIXES: [&str; 8] = [
    "ypub", "zpub", "Ypub", "Zpub", "upub", "vpub", "Upub", "Vpub",
];

/// Rewrite every SLIP-132 key in the descriptor to its `xpub`/`tpub` form
fn standardize_keys(descriptor: &str) -> SpendResult<String> {
    let mut standard = String::with_capacity(descriptor.len());
    let mut rest = descriptor;

    while let Some(start) = rest.find(|c: char| c.is_ascii_alphanumeric()) {
        standard.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(tail.len());
        let token = &tail[..end];

        if SLIP132_PREFIXES.iter().any(|prefix| token.starts_with(prefix)) && token.len() > 100 {
            let key = to_standard_string(token).map_err(|e| match e {
                SpendError::Derivation(message) => SpendError::Validation(message),
                other => other,
            })?;
            standard.push_str(&key);
        } else {
            standard.push_str(token);
        }
        rest = &tail[end..];
    }
    standard.push_str(rest);
    Ok(standard)
}

fn only_sortedmulti() -> SpendError {
    SpendError::validation("Only sortedmulti descriptors are supported for multisig wallets")
}

fn sortedmulti(
    threshold: usize,
    keys: &[DescriptorPublicKey],
    script_type: ScriptType,
) -> SpendResult<WalletDescriptor> {
    let cosigners = keys.iter().map(cosigner_key).collect::<SpendResult<Vec<_>>>()?;
    let total = cosigners.len();

    if total == 0 || total > MAX_COSIGNERS {
        return Err(SpendError::validation(format!(
            "Multisig needs between 1 and {} keys, found {}",
            MAX_COSIGNERS, total
        )));
    }
    if threshold == 0 || threshold > total {
        return Err(SpendError::validation(format!(
            "Invalid quorum {}-of-{}",
            threshold, total
        )));
    }

    debug!("Parsed {}-of-{} {} descriptor", threshold, total, script_type);
    Ok(WalletDescriptor::Multi(MultisigDescriptor {
        quorum: Quorum {
            required: threshold,
            total,
        },
        script_type,
        cosigners,
    }))
}

fn single(script_type: ScriptType, key: &DescriptorPublicKey) -> SpendResult<WalletDescriptor> {
    Ok(WalletDescriptor::Single(SingleKeyDescriptor {
        script_type,
        key: cosigner_key(key)?,
    }))
}

fn cosigner_key(key: &DescriptorPublicKey) -> SpendResult<CosignerKey> {
    let (origin, xpub) = match key {
        DescriptorPublicKey::XPub(xkey) => (&xkey.origin, xkey.xkey),
        DescriptorPublicKey::MultiXPub(xkey) => (&xkey.origin, xkey.xkey),
        DescriptorPublicKey::Single(_) => {
            return Err(SpendError::validation(
                "Descriptor keys must be extended public keys",
            ))
        }
    };

    Ok(CosignerKey {
        fingerprint: origin.as_ref().map(|(fingerprint, _)| *fingerprint),
        account_path: origin.as_ref().map(|(_, path)| path.clone()),
        xpub,
    })
}
