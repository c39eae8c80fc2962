//! UTXO selection strategies
//!
//! Each strategy implements the [`Strategy`] trait. A strategy fixes the order
//! in which eligible UTXOs are accumulated; settlement of amounts is shared in
//! [`base`].

use spendkit_common::error::{SpendError, SpendResult};

use crate::utxo_selection::types::{Selection, SelectionParams, SelectionStrategy, Utxo};

pub mod base;
pub mod largest_first;
pub mod smallest_first;

pub use largest_first::LargestFirstStrategy;
pub use smallest_first::SmallestFirstStrategy;

/// Trait defining a UTXO selection strategy
pub trait Strategy {
    /// Name of this strategy
    fn name(&self) -> &'static str;

    /// Select UTXOs using this strategy
    ///
    /// # Arguments
    /// * `utxos` - Eligible UTXOs, in directory order
    /// * `params` - Target, fee rate and dust threshold
    ///
    /// # Returns
    /// * The selection, or `InsufficientFunds` if every UTXO is still short
    fn select(&self, utxos: &[Utxo], params: &SelectionParams) -> SpendResult<Selection>;
}

/// Strategy implementation for a requested strategy value
pub fn for_strategy(strategy: SelectionStrategy) -> SpendResult<Box<dyn Strategy>> {
    match strategy {
        SelectionStrategy::LargestFirst => Ok(Box::new(LargestFirstStrategy)),
        SelectionStrategy::SmallestFirst => Ok(Box::new(SmallestFirstStrategy)),
        SelectionStrategy::BranchAndBound => Err(SpendError::validation(
            "BranchAndBound selection is reserved and not available",
        )),
    }
}
