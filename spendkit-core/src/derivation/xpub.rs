//! Extended public key parsing with SLIP-132 support
//!
//! Hardware wallets export account keys with script-specific version bytes
//! (`zpub` for native segwit, `Ypub` for nested multisig, ...). The key material
//! is identical to a plain `xpub`/`tpub`; only the 4-byte prefix differs. Keys
//! are rewritten to the standard prefix before BIP32 parsing.
//!
//! # Security Considerations
//!
//! - Extended keys are public but privacy-sensitive: they are never logged and
//!   never embedded in error messages

use bitcoin::base58;
use bitcoin::bip32::{ExtendedPubKey, Fingerprint};
use bitcoin::Network;
use std::str::FromStr;

use spendkit_common::error::{SpendError, SpendResult};

/// Standard mainnet `xpub` version bytes
pub const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];

/// Standard testnet `tpub` version bytes
pub const TPUB_VERSION: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];

/// SLIP-132 mainnet prefixes: ypub, zpub, Ypub, Zpub
const MAINNET_VARIANTS: [[u8; 4]; 4] = [
    [0x04, 0x9D, 0x7C, 0xB2],
    [0x04, 0xB2, 0x47, 0x46],
    [0x02, 0x95, 0xB4, 0x3F],
    [0x02, 0xAA, 0x7E, 0xD3],
];

/// SLIP-132 testnet prefixes: upub, vpub, Upub, Vpub
const TESTNET_VARIANTS: [[u8; 4]; 4] = [
    [0x04, 0x4A, 0x52, 0x62],
    [0x04, 0x5F, 0x1C, 0xF6],
    [0x02, 0x42, 0x89, 0xEF],
    [0x02, 0x57, 0x54, 0x83],
];

/// Serialized extended key length (without checksum)
const EXTENDED_KEY_LEN: usize = 78;

/// Rewrite an extended public key to standard `xpub`/`tpub` version bytes
///
/// Keys that already carry a standard prefix pass through unchanged.
pub fn to_standard_bytes(key: &str) -> SpendResult<Vec<u8>> {
    let mut data = base58::decode_check(key.trim())
        .map_err(|_| SpendError::derivation("Extended public key is not valid base58check"))?;

    if data.len() != EXTENDED_KEY_LEN {
        return Err(SpendError::derivation(format!(
            "Extended public key has {} bytes, expected {}",
            data.len(),
            EXTENDED_KEY_LEN
        )));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&data[..4]);

    let standard = if version == XPUB_VERSION || MAINNET_VARIANTS.contains(&version) {
        XPUB_VERSION
    } else if version == TPUB_VERSION || TESTNET_VARIANTS.contains(&version) {
        TPUB_VERSION
    } else {
        return Err(SpendError::derivation(format!(
            "Unknown extended public key version {}",
            hex::encode(version)
        )));
    };

    data[..4].copy_from_slice(&standard);
    Ok(data)
}

/// Convert a SLIP-132 key string into its `xpub`/`tpub` encoding
pub fn to_standard_string(key: &str) -> SpendResult<String> {
    Ok(base58::encode_check(&to_standard_bytes(key)?))
}

/// Parse an extended public key in standard or SLIP-132 encoding
pub fn parse_xpub(key: &str) -> SpendResult<ExtendedPubKey> {
    let data = to_standard_bytes(key)?;
    ExtendedPubKey::decode(&data).map_err(SpendError::from)
}

/// Whether a key's network family matches a wallet network
///
/// `tpub` keys serve testnet, signet and regtest alike.
pub fn network_matches(key: &ExtendedPubKey, network: Network) -> bool {
    (key.network == Network::Bitcoin) == (network == Network::Bitcoin)
}

/// Parse an 8-hex-character master key fingerprint
pub fn parse_fingerprint(fingerprint: &str) -> SpendResult<Fingerprint> {
    let trimmed = fingerprint.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SpendError::derivation(format!(
            "Invalid master fingerprint '{}'",
            trimmed
        )));
    }
    Fingerprint::from_str(&trimmed.to_lowercase())
        .map_err(|_| SpendError::derivation(format!("Invalid master fingerprint '{}'", trimmed)))
}
