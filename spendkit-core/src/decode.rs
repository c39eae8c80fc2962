//! Read-only bundle decoding for pre-sign display
//!
//! Shows what a bundle spends and pays without any wallet context, so a user
//! can review a bundle received from elsewhere before signing it.

use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::{Address, Network, Txid};
use serde::{Deserialize, Serialize};

use spendkit_common::error::{SpendError, SpendResult};

/// One spent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInput {
    pub txid: Txid,
    pub vout: u32,
    /// Known when the bundle carries the spent output
    pub value: Option<u64>,
}

/// One created output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    /// `None` for scripts without an address form
    pub address: Option<String>,
    pub value: u64,
}

/// Plain view of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub inputs: Vec<DecodedInput>,
    pub outputs: Vec<DecodedOutput>,
    /// Known when every input value is known
    pub fee: Option<u64>,
}

/// Decode a base64 bundle
pub fn decode_bundle(psbt_base64: &str, network: Network) -> SpendResult<BundleSummary> {
    let bytes = base64::decode(psbt_base64.trim()).map_err(|e| SpendError::Serialization {
        context: format!("Bundle is not valid base64: {}", e),
        source: Some(Box::new(e)),
    })?;
    let psbt = PartiallySignedTransaction::deserialize(&bytes)?;
    Ok(summarize(&psbt, network))
}

/// Summarize a parsed bundle
pub fn summarize(psbt: &PartiallySignedTransaction, network: Network) -> BundleSummary {
    let inputs: Vec<DecodedInput> = psbt
        .unsigned_tx
        .input
        .iter()
        .zip(&psbt.inputs)
        .map(|(txin, input)| {
            let outpoint = txin.previous_output;
            let value = input.witness_utxo.as_ref().map(|out| out.value).or_else(|| {
                input
                    .non_witness_utxo
                    .as_ref()
                    .and_then(|tx| tx.output.get(outpoint.vout as usize))
                    .map(|out| out.value)
            });
            DecodedInput {
                txid: outpoint.txid,
                vout: outpoint.vout,
                value,
            }
        })
        .collect();

    let outputs: Vec<DecodedOutput> = psbt
        .unsigned_tx
        .output
        .iter()
        .map(|out| DecodedOutput {
            address: Address::from_script(&out.script_pubkey, network)
                .ok()
                .map(|address| address.to_string()),
            value: out.value,
        })
        .collect();

    let total_in = inputs
        .iter()
        .try_fold(0u64, |sum, input| input.value.and_then(|v| sum.checked_add(v)));
    let total_out = outputs
        .iter()
        .try_fold(0u64, |sum, out| sum.checked_add(out.value));
    let fee = total_in
        .zip(total_out)
        .and_then(|(total_in, total_out)| total_in.checked_sub(total_out));

    BundleSummary {
        inputs,
        outputs,
        fee,
    }
}
