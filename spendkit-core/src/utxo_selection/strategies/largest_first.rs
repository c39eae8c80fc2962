//! LargestFirst UTXO selection strategy
//!
//! Spends the largest UTXOs first, which minimizes the input count and so the
//! fee. Equal amounts keep their directory order.

use spendkit_common::error::SpendResult;

use crate::utxo_selection::strategies::{base, Strategy};
use crate::utxo_selection::types::{Selection, SelectionParams, Utxo};

/// Strategy for minimizing fees by selecting larger UTXOs first
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirstStrategy;

/// Sort UTXOs by amount, largest first, keeping the order of equal amounts
pub fn sort_descending(utxos: &[Utxo]) -> Vec<Utxo> {
    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));
    sorted
}

impl Strategy for LargestFirstStrategy {
    fn name(&self) -> &'static str {
        "LargestFirst"
    }

    fn select(&self, utxos: &[Utxo], params: &SelectionParams) -> SpendResult<Selection> {
        base::accumulate(sort_descending(utxos), params)
    }
}
