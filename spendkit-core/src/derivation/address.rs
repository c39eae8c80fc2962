//! Address derivation from account keys
//!
//! Produces the same addresses a hardware signer shows for `change/index`
//! under an account key, for single-key and sorted-multisig wallets.

use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification};
use bitcoin::{Address, Network, ScriptBuf};

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::types::ScriptType;

use super::path::child_steps;
use super::xpub::{network_matches, parse_xpub};
use crate::multisig::wrap_multisig;

/// Address paying to a single key under the given flavor
pub fn single_key_address<C: Verification>(
    secp: &Secp256k1<C>,
    key: &PublicKey,
    script_type: ScriptType,
    network: Network,
) -> SpendResult<Address> {
    let key = bitcoin::PublicKey::new(*key);
    let address = match script_type {
        ScriptType::Legacy => Address::p2pkh(&key, network),
        ScriptType::NestedSegwit => Address::p2shwpkh(&key, network)?,
        ScriptType::NativeSegwit => Address::p2wpkh(&key, network)?,
        ScriptType::Taproot => {
            let (internal_key, _) = key.inner.x_only_public_key();
            Address::p2tr(secp, internal_key, None, network)
        }
    };
    Ok(address)
}

/// Locking script paying to a single key under the given flavor
pub fn single_key_script<C: Verification>(
    secp: &Secp256k1<C>,
    key: &PublicKey,
    script_type: ScriptType,
) -> SpendResult<ScriptBuf> {
    // The network does not affect the script
    Ok(single_key_address(secp, key, script_type, Network::Bitcoin)?.script_pubkey())
}

/// Derive the address at `change/index` of a single-key account
///
/// # Arguments
/// * `xpub` - Account key, standard or SLIP-132 encoded
/// * `change` - 0 for receive, 1 for change
/// * `index` - Address index
/// * `script_type` - Address flavor
/// * `network` - Network the address is encoded for
pub fn derive_single_sig_address(
    xpub: &str,
    change: u32,
    index: u32,
    script_type: ScriptType,
    network: Network,
) -> SpendResult<Address> {
    let secp = Secp256k1::verification_only();
    let account = parse_xpub(xpub)?;
    check_network(&account, network)?;

    let child = account.derive_pub(&secp, &child_steps(change, index)?)?;
    single_key_address(&secp, &child.public_key, script_type, network)
}

/// Derive the sorted-multisig address at `change/index`
///
/// `Legacy` yields P2SH, `NestedSegwit` P2SH-P2WSH and `NativeSegwit` P2WSH.
pub fn derive_multisig_address(
    xpubs: &[&str],
    threshold: usize,
    change: u32,
    index: u32,
    script_type: ScriptType,
    network: Network,
) -> SpendResult<Address> {
    let secp = Secp256k1::verification_only();
    let steps = child_steps(change, index)?;

    let mut keys = Vec::with_capacity(xpubs.len());
    for xpub in xpubs {
        let account = parse_xpub(xpub)?;
        check_network(&account, network)?;
        keys.push(account.derive_pub(&secp, &steps)?.public_key);
    }

    let scripts = wrap_multisig(threshold, &keys, script_type)?;
    Address::from_script(&scripts.script_pubkey, network).map_err(SpendError::from)
}

fn check_network(key: &bitcoin::bip32::ExtendedPubKey, network: Network) -> SpendResult<()> {
    if network_matches(key, network) {
        Ok(())
    } else {
        Err(SpendError::derivation(format!(
            "Extended key is for {}, wallet is on {}",
            key.network, network
        )))
    }
}
