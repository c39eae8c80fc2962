//! SmallestFirst UTXO selection strategy
//!
//! Spends the smallest UTXOs first to consolidate small coins while fees are
//! low. Equal amounts keep their directory order.

use spendkit_common::error::SpendResult;

use crate::utxo_selection::strategies::{base, Strategy};
use crate::utxo_selection::types::{Selection, SelectionParams, Utxo};

/// Strategy for consolidating by selecting smaller UTXOs first
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallestFirstStrategy;

impl Strategy for SmallestFirstStrategy {
    fn name(&self) -> &'static str {
        "SmallestFirst"
    }

    fn select(&self, utxos: &[Utxo], params: &SelectionParams) -> SpendResult<Selection> {
        let mut sorted = utxos.to_vec();
        sorted.sort_by_key(|utxo| utxo.amount);
        base::accumulate(sorted, params)
    }
}
