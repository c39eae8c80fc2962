//! Key derivation
//!
//! Everything that turns wallet key data into signer metadata and addresses.
//!
//! # Module Structure
//!
//! - **path**: canonical derivation path notation
//! - **xpub**: extended public key parsing, including SLIP-132 prefixes
//! - **descriptor**: output descriptor parsing into quorum, flavor and cosigners
//! - **address**: single-sig and sorted-multisig address derivation
//! - **resolver**: per-input (fingerprint, path, pubkey) metadata
//!
//! # Security Considerations
//!
//! - Only public keys are handled here; nothing in this module can sign
//! - Extended keys are never logged

pub mod address;
pub mod descriptor;
pub mod path;
pub mod resolver;
pub mod xpub;

pub use address::{derive_multisig_address, derive_single_sig_address, single_key_address};
pub use descriptor::{
    parse_descriptor, parse_multisig_descriptor, CosignerKey, MultisigDescriptor, Quorum,
    SingleKeyDescriptor, WalletDescriptor, MAX_COSIGNERS,
};
pub use path::{normalize_path, parse_path};
pub use resolver::{DerivationOutcome, KeyOrigin, KeyResolver};
pub use xpub::{parse_fingerprint, parse_xpub, to_standard_string};
