//! Signer metadata for bundle inputs and change outputs
//!
//! Hardware signers use this data to recognize their own keys. For inputs it
//! decides whether the device signs; for change outputs it lets the device
//! show "change" instead of asking the user to approve a payment to themselves.
//! None of it reaches the final transaction.

use bitcoin::bip32::KeySource;
use bitcoin::psbt::{Input, Output};
use bitcoin::secp256k1::{PublicKey, XOnlyPublicKey};
use bitcoin::taproot::TapLeafHash;
use bitcoin::{Script, ScriptBuf};
use log::warn;
use std::collections::BTreeMap;

use spendkit_common::types::ScriptType;

use crate::derivation::address::single_key_script;
use crate::derivation::path::{change_and_index, parse_path};
use crate::derivation::resolver::{DerivationOutcome, KeyOrigin, KeyResolver};
use crate::multisig::derive_multisig_scripts;

/// Everything a signer needs to recognize one script
#[derive(Debug, Clone)]
pub(crate) struct SignerMetadata {
    pub derivation: DerivationOutcome,
    pub witness_script: Option<ScriptBuf>,
    pub redeem_script: Option<ScriptBuf>,
}

/// Resolve key origins and scripts for an address path
pub(crate) fn signer_metadata(
    resolver: &KeyResolver,
    script_type: ScriptType,
    path: Option<&str>,
    script_pubkey: &Script,
) -> SignerMetadata {
    let derivation = resolver.resolve(path, Some(script_pubkey));

    let (witness_script, redeem_script) = match resolver.multisig() {
        Some(descriptor) => {
            let scripts = path
                .and_then(|p| parse_path(p).ok())
                .and_then(|p| change_and_index(&p))
                .and_then(|(change, index)| {
                    derive_multisig_scripts(resolver.secp(), descriptor, change, index)
                });
            match scripts {
                Some(scripts) if scripts.script_pubkey.as_script() == script_pubkey => {
                    (scripts.witness_script, scripts.redeem_script)
                }
                Some(_) => {
                    warn!("Derived multisig script does not match the output script");
                    (None, None)
                }
                None => (None, None),
            }
        }
        None => (None, nested_redeem_script(resolver, script_type, &derivation)),
    };

    SignerMetadata {
        derivation,
        witness_script,
        redeem_script,
    }
}

/// P2SH-P2WPKH spends reveal the P2WPKH program as redeem script
fn nested_redeem_script(
    resolver: &KeyResolver,
    script_type: ScriptType,
    derivation: &DerivationOutcome,
) -> Option<ScriptBuf> {
    if script_type != ScriptType::NestedSegwit {
        return None;
    }
    let origin = derivation.origins().first()?;
    single_key_script(resolver.secp(), &origin.pubkey, ScriptType::NativeSegwit).ok()
}

fn key_sources(origins: &[KeyOrigin]) -> BTreeMap<PublicKey, KeySource> {
    origins
        .iter()
        .map(|origin| (origin.pubkey, (origin.fingerprint, origin.path.clone())))
        .collect()
}

type TapKeyOrigins = BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, KeySource)>;

fn tap_key_origins(origins: &[KeyOrigin]) -> Option<(XOnlyPublicKey, TapKeyOrigins)> {
    let origin = origins.first()?;
    let (internal_key, _) = origin.pubkey.x_only_public_key();
    let mut map = BTreeMap::new();
    map.insert(
        internal_key,
        (Vec::new(), (origin.fingerprint, origin.path.clone())),
    );
    Some((internal_key, map))
}

/// Attach metadata to a bundle input
pub(crate) fn apply_to_input(input: &mut Input, metadata: &SignerMetadata, script_type: ScriptType, multisig: bool) {
    let origins = metadata.derivation.origins();
    if script_type == ScriptType::Taproot && !multisig {
        if let Some((internal_key, origins)) = tap_key_origins(origins) {
            input.tap_internal_key = Some(internal_key);
            input.tap_key_origins = origins;
        }
    } else {
        input.bip32_derivation = key_sources(origins);
    }
    input.witness_script = metadata.witness_script.clone();
    input.redeem_script = metadata.redeem_script.clone();
}

/// Attach metadata to a change or decoy output
pub(crate) fn apply_to_output(output: &mut Output, metadata: &SignerMetadata, script_type: ScriptType, multisig: bool) {
    let origins = metadata.derivation.origins();
    if script_type == ScriptType::Taproot && !multisig {
        if let Some((internal_key, origins)) = tap_key_origins(origins) {
            output.tap_internal_key = Some(internal_key);
            output.tap_key_origins = origins;
        }
    } else {
        output.bip32_derivation = key_sources(origins);
    }
    output.witness_script = metadata.witness_script.clone();
    output.redeem_script = metadata.redeem_script.clone();
}
