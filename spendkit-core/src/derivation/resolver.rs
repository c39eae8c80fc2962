//! Key Derivation Resolver
//!
//! Computes the signer metadata hardware wallets need to recognize an input or
//! change output as theirs: one (fingerprint, path, pubkey) tuple per signer.
//!
//! - Single-sig wallets take the fingerprint and account key from the first
//!   registered device that has a key, falling back to the key origin embedded
//!   in a single-key descriptor.
//! - Multisig wallets parse the descriptor into ordered cosigners and derive
//!   every cosigner key at the input's `change/index`.
//!
//! Resolution is best-effort. Missing fingerprints, paths or keys never abort
//! a build: the outcome is [`DerivationOutcome::NotAttached`] with a reason, and
//! the bundle simply lacks metadata for that input.

use bitcoin::bip32::{ChildNumber, DerivationPath, ExtendedPubKey, Fingerprint};
use bitcoin::secp256k1::{PublicKey, Secp256k1, VerifyOnly};
use bitcoin::Script;
use log::warn;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::types::{ScriptType, Wallet};

use super::address::single_key_script;
use super::descriptor::{parse_descriptor, parse_multisig_descriptor, MultisigDescriptor, WalletDescriptor};
use super::path::{change_and_index, parse_path};
use super::xpub::{network_matches, parse_fingerprint, parse_xpub};
use crate::multisig::derive_multisig_scripts;

/// One signer's view of a key: who holds it and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOrigin {
    pub fingerprint: Fingerprint,
    /// Full path from the master key
    pub path: DerivationPath,
    pub pubkey: PublicKey,
}

/// Per-input result of metadata resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationOutcome {
    /// Metadata attached, one origin per signer
    Attached(Vec<KeyOrigin>),
    /// Metadata omitted; the build continued
    NotAttached { reason: String },
}

impl DerivationOutcome {
    pub fn is_attached(&self) -> bool {
        matches!(self, DerivationOutcome::Attached(_))
    }

    /// Attached origins, empty when not attached
    pub fn origins(&self) -> &[KeyOrigin] {
        match self {
            DerivationOutcome::Attached(origins) => origins,
            DerivationOutcome::NotAttached { .. } => &[],
        }
    }
}

/// Signer data of a single-sig wallet; any part may be missing
#[derive(Debug, Clone, Default)]
struct SingleSigner {
    fingerprint: Option<Fingerprint>,
    xpub: Option<ExtendedPubKey>,
}

#[derive(Debug, Clone)]
enum Signers {
    Single(SingleSigner),
    Multi(MultisigDescriptor),
}

/// Resolves signer metadata for one wallet
///
/// Built once per build and reused for every input and change output.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    secp: Secp256k1<VerifyOnly>,
    script_type: ScriptType,
    signers: Signers,
}

impl KeyResolver {
    /// Prepare resolution for a wallet
    ///
    /// # Returns
    /// * `Validation` error when a multisig descriptor does not parse, does
    ///   not match the wallet flavor, or holds keys for another network
    /// * Never fails for single-sig wallets; unusable device data only
    ///   disables metadata
    pub fn for_wallet(wallet: &Wallet) -> SpendResult<Self> {
        let signers = if wallet.is_multisig() {
            let descriptor = wallet.descriptor.as_deref().unwrap_or_default();
            let parsed = parse_multisig_descriptor(descriptor)?;
            if parsed.script_type != wallet.script_type {
                return Err(SpendError::validation(format!(
                    "Descriptor of wallet {} is {}, wallet is configured as {}",
                    wallet.id,
                    parsed.script_type.multisig_label(),
                    wallet.script_type.multisig_label()
                )));
            }
            if parsed.cosigners.iter().any(|c| !network_matches(&c.xpub, wallet.network)) {
                return Err(SpendError::validation(format!(
                    "Descriptor of wallet {} holds keys for another network",
                    wallet.id
                )));
            }
            Signers::Multi(parsed)
        } else {
            Signers::Single(single_signer(wallet))
        };

        Ok(Self {
            secp: Secp256k1::verification_only(),
            script_type: wallet.script_type,
            signers,
        })
    }

    /// The parsed multisig descriptor, for multisig wallets
    pub fn multisig(&self) -> Option<&MultisigDescriptor> {
        match &self.signers {
            Signers::Multi(descriptor) => Some(descriptor),
            Signers::Single(_) => None,
        }
    }

    /// Verification context shared with script derivation
    pub fn secp(&self) -> &Secp256k1<VerifyOnly> {
        &self.secp
    }

    /// Resolve metadata for an address path
    ///
    /// # Arguments
    /// * `path` - Full derivation path recorded for the address, if any
    /// * `script_pubkey` - Locking script the derived keys must reproduce
    pub fn resolve(&self, path: Option<&str>, script_pubkey: Option<&Script>) -> DerivationOutcome {
        let result = match path {
            Some(path) => self.try_resolve(path, script_pubkey),
            None => Err(SpendError::derivation("no derivation path recorded for the address")),
        };

        match result {
            Ok(origins) => DerivationOutcome::Attached(origins),
            Err(e) => {
                warn!("Signer metadata omitted: {}", e);
                DerivationOutcome::NotAttached {
                    reason: match e {
                        SpendError::Derivation(reason) => reason,
                        other => other.to_string(),
                    },
                }
            }
        }
    }

    fn try_resolve(&self, path: &str, script_pubkey: Option<&Script>) -> SpendResult<Vec<KeyOrigin>> {
        let full_path = parse_path(path)?;
        let (change, index) = change_and_index(&full_path).ok_or_else(|| {
            SpendError::derivation(format!("path {} does not end in change/index", path))
        })?;

        match &self.signers {
            Signers::Single(signer) => {
                let origin = self.resolve_single(signer, full_path, change, index)?;
                if let Some(expected) = script_pubkey {
                    let derived = single_key_script(&self.secp, &origin.pubkey, self.script_type)?;
                    if derived.as_script() != expected {
                        return Err(SpendError::derivation(
                            "derived key does not match the output script",
                        ));
                    }
                }
                Ok(vec![origin])
            }
            Signers::Multi(descriptor) => {
                if let Some(expected) = script_pubkey {
                    let matches = derive_multisig_scripts(&self.secp, descriptor, change, index)
                        .map_or(false, |scripts| scripts.script_pubkey.as_script() == expected);
                    if !matches {
                        return Err(SpendError::derivation(
                            "derived multisig script does not match the output script",
                        ));
                    }
                }
                self.resolve_multi(descriptor, change, index)
            }
        }
    }

    fn resolve_single(
        &self,
        signer: &SingleSigner,
        full_path: DerivationPath,
        change: ChildNumber,
        index: ChildNumber,
    ) -> SpendResult<KeyOrigin> {
        let fingerprint = signer
            .fingerprint
            .ok_or_else(|| SpendError::derivation("no master fingerprint registered"))?;
        let xpub = signer
            .xpub
            .as_ref()
            .ok_or_else(|| SpendError::derivation("no extended public key registered"))?;

        let child = xpub.derive_pub(&self.secp, &[change, index])?;
        Ok(KeyOrigin {
            fingerprint,
            path: full_path,
            pubkey: child.public_key,
        })
    }

    fn resolve_multi(
        &self,
        descriptor: &MultisigDescriptor,
        change: ChildNumber,
        index: ChildNumber,
    ) -> SpendResult<Vec<KeyOrigin>> {
        descriptor
            .cosigners
            .iter()
            .enumerate()
            .map(|(position, cosigner)| {
                let (fingerprint, account_path) = cosigner
                    .fingerprint
                    .zip(cosigner.account_path.clone())
                    .ok_or_else(|| {
                        SpendError::derivation(format!("cosigner {} has no key origin", position))
                    })?;
                let child = cosigner.xpub.derive_pub(&self.secp, &[change, index])?;
                Ok(KeyOrigin {
                    fingerprint,
                    path: account_path.extend([change, index]),
                    pubkey: child.public_key,
                })
            })
            .collect()
    }
}

/// Collect single-sig signer data from devices, then the descriptor
fn single_signer(wallet: &Wallet) -> SingleSigner {
    let mut signer = SingleSigner::default();

    if let Some(device) = wallet.devices.iter().find(|d| d.xpub.is_some()) {
        signer.fingerprint = device.fingerprint.as_deref().and_then(|fp| match parse_fingerprint(fp) {
            Ok(fingerprint) => Some(fingerprint),
            Err(e) => {
                warn!("Wallet {}: {}", wallet.id, e);
                None
            }
        });
        signer.xpub = device.xpub.as_deref().and_then(|key| match parse_xpub(key) {
            Ok(xpub) if network_matches(&xpub, wallet.network) => Some(xpub),
            Ok(_) => {
                warn!("Wallet {}: device key is for another network", wallet.id);
                None
            }
            Err(e) => {
                warn!("Wallet {}: {}", wallet.id, e);
                None
            }
        });
    }

    if signer.fingerprint.is_some() && signer.xpub.is_some() {
        return signer;
    }

    if let Some(descriptor) = wallet.descriptor.as_deref() {
        match parse_descriptor(descriptor) {
            Ok(WalletDescriptor::Single(single)) => {
                if signer.xpub.is_none() && network_matches(&single.key.xpub, wallet.network) {
                    signer.xpub = Some(single.key.xpub);
                }
                if signer.fingerprint.is_none() {
                    signer.fingerprint = single.key.fingerprint;
                }
            }
            Ok(WalletDescriptor::Multi(_)) => {
                warn!("Single-sig wallet {} carries a multisig descriptor", wallet.id)
            }
            Err(e) => warn!("Wallet {} descriptor unusable: {}", wallet.id, e),
        }
    }

    signer
}
