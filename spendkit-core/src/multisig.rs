//! Sorted multisig script construction and parsing
//!
//! Builds the canonical `OP_M <keys> OP_N OP_CHECKMULTISIG` script with keys in
//! lexicographic byte order (BIP67), and wraps it for the wallet's flavor:
//!
//! | Flavor        | witness script | redeem script      | output          |
//! |---------------|----------------|--------------------|-----------------|
//! | P2WSH         | multisig       | -                  | P2WSH(ms)       |
//! | P2SH-P2WSH    | multisig       | P2WSH(ms)          | P2SH(P2WSH(ms)) |
//! | P2SH          | -              | multisig           | P2SH(ms)        |
//!
//! Key order on the script is independent of descriptor declaration order, so
//! every cosigner device computes the same script.

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::bip32::ChildNumber;
use bitcoin::script::{Builder, Instruction};
use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification};
use bitcoin::{Script, ScriptBuf};
use log::warn;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::types::ScriptType;

use crate::derivation::descriptor::MultisigDescriptor;

/// Largest key count an `OP_N` opcode can express
const MAX_SCRIPT_KEYS: usize = 16;

/// Scripts for one multisig address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigScripts {
    /// The bare `OP_M ... OP_CHECKMULTISIG` script
    pub multisig_script: ScriptBuf,
    /// Script revealed in the witness (segwit flavors)
    pub witness_script: Option<ScriptBuf>,
    /// Script revealed in scriptSig (P2SH flavors)
    pub redeem_script: Option<ScriptBuf>,
    /// Locking script of the address
    pub script_pubkey: ScriptBuf,
    /// Keys in on-script order
    pub sorted_keys: Vec<PublicKey>,
}

/// A multisig script read back from its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMultisig {
    pub required: usize,
    /// Keys in on-script order
    pub keys: Vec<PublicKey>,
}

/// Sort keys by their compressed serialization
pub fn sort_keys(keys: &mut [PublicKey]) {
    keys.sort_by_key(|key| key.serialize());
}

/// Build the sorted `M`-of-`N` multisig script
pub fn sorted_multisig_script(required: usize, keys: &[PublicKey]) -> SpendResult<ScriptBuf> {
    if keys.is_empty() || keys.len() > MAX_SCRIPT_KEYS {
        return Err(SpendError::validation(format!(
            "Multisig needs between 1 and {} keys, got {}",
            MAX_SCRIPT_KEYS,
            keys.len()
        )));
    }
    if required == 0 || required > keys.len() {
        return Err(SpendError::validation(format!(
            "Invalid quorum {}-of-{}",
            required,
            keys.len()
        )));
    }

    let mut sorted = keys.to_vec();
    sort_keys(&mut sorted);

    let mut builder = Builder::new().push_int(required as i64);
    for key in &sorted {
        builder = builder.push_key(&bitcoin::PublicKey::new(*key));
    }
    Ok(builder
        .push_int(sorted.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Wrap a multisig script for the given flavor
pub fn wrap_multisig(
    required: usize,
    keys: &[PublicKey],
    script_type: ScriptType,
) -> SpendResult<MultisigScripts> {
    let multisig_script = sorted_multisig_script(required, keys)?;
    let mut sorted_keys = keys.to_vec();
    sort_keys(&mut sorted_keys);

    let (witness_script, redeem_script, script_pubkey) = match script_type {
        ScriptType::NativeSegwit => {
            let script_pubkey = multisig_script.to_v0_p2wsh();
            (Some(multisig_script.clone()), None, script_pubkey)
        }
        ScriptType::NestedSegwit => {
            let redeem = multisig_script.to_v0_p2wsh();
            let script_pubkey = redeem.to_p2sh();
            (Some(multisig_script.clone()), Some(redeem), script_pubkey)
        }
        ScriptType::Legacy => {
            let script_pubkey = multisig_script.to_p2sh();
            (None, Some(multisig_script.clone()), script_pubkey)
        }
        ScriptType::Taproot => {
            return Err(SpendError::validation(
                "Taproot multisig is not supported",
            ))
        }
    };

    Ok(MultisigScripts {
        multisig_script,
        witness_script,
        redeem_script,
        script_pubkey,
        sorted_keys,
    })
}

/// Derive the scripts of a multisig wallet at `change/index`
///
/// Every cosigner key is derived independently of the key resolver. Returns
/// `None` when a key fails to derive or the key count differs from the quorum
/// total; the caller then omits script metadata for that input or output.
pub fn derive_multisig_scripts<C: Verification>(
    secp: &Secp256k1<C>,
    descriptor: &MultisigDescriptor,
    change: ChildNumber,
    index: ChildNumber,
) -> Option<MultisigScripts> {
    let mut keys = Vec::with_capacity(descriptor.cosigners.len());
    for (position, cosigner) in descriptor.cosigners.iter().enumerate() {
        match cosigner.xpub.derive_pub(secp, &[change, index]) {
            Ok(child) => keys.push(child.public_key),
            Err(e) => {
                warn!("Cosigner {} key failed to derive at {}/{}: {}", position, change, index, e);
                return None;
            }
        }
    }

    if keys.len() != descriptor.quorum.total {
        warn!(
            "Derived {} keys for a {}-of-{} quorum",
            keys.len(),
            descriptor.quorum.required,
            descriptor.quorum.total
        );
        return None;
    }

    match wrap_multisig(descriptor.quorum.required, &keys, descriptor.script_type) {
        Ok(scripts) => Some(scripts),
        Err(e) => {
            warn!("Multisig script construction failed: {}", e);
            None
        }
    }
}

/// Read `M`, `N` and the keys back from a multisig script
///
/// Returns `None` unless the script is exactly
/// `OP_M <33-byte key>... OP_N OP_CHECKMULTISIG` with `M <= N`.
pub fn parse_multisig_script(script: &Script) -> Option<ParsedMultisig> {
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let (first, rest) = instructions.split_first()?;
    let (last, rest) = rest.split_last()?;
    let (count, pushes) = rest.split_last()?;

    if !matches!(last, Instruction::Op(op) if *op == OP_CHECKMULTISIG) {
        return None;
    }
    let required = pushnum(first)?;
    let total = pushnum(count)?;

    let keys = pushes
        .iter()
        .map(|instruction| match instruction {
            Instruction::PushBytes(bytes) if bytes.len() == 33 => {
                PublicKey::from_slice(bytes.as_bytes()).ok()
            }
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    if keys.len() != total || required > total {
        return None;
    }
    Some(ParsedMultisig { required, keys })
}

/// Value of an `OP_1`..`OP_16` instruction
fn pushnum(instruction: &Instruction) -> Option<usize> {
    let Instruction::Op(op) = instruction else {
        return None;
    };
    let (low, high) = (OP_PUSHNUM_1.to_u8(), OP_PUSHNUM_16.to_u8());
    let byte = op.to_u8();
    (low..=high)
        .contains(&byte)
        .then(|| (byte - low + 1) as usize)
}
