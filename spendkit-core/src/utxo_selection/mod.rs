//! UTXO Selection Module
//!
//! Chooses which of a wallet's UTXOs fund a transaction.
//!
//! # Module Structure
//!
//! - **types**: `Utxo`, strategy and mode enums, request and result types
//! - **selector**: `UtxoSelector`, eligibility filtering and mode dispatch
//! - **strategies**: `LargestFirst` and `SmallestFirst` orderings plus the
//!   shared settlement rules in `strategies::base`
//!
//! # Typical Usage
//!
//! ```no_run
//! use spendkit_core::providers::MemoryUtxoDirectory;
//! use spendkit_core::utxo_selection::{
//!     SelectionMode, SelectionParams, SelectionRequest, SelectionStrategy, UtxoSelector,
//! };
//! use spendkit_common::types::ScriptType;
//! use rust_decimal_macros::dec;
//!
//! let directory = MemoryUtxoDirectory::new();
//! let selector = UtxoSelector::new(&directory);
//! let selection = selector.select(&SelectionRequest {
//!     wallet_id: "wallet-1".to_string(),
//!     params: SelectionParams {
//!         target: 50_000,
//!         fee_rate: dec!(10),
//!         script_type: ScriptType::NativeSegwit,
//!         recipient_count: 1,
//!         dust_threshold: 546,
//!     },
//!     strategy: SelectionStrategy::LargestFirst,
//!     mode: SelectionMode::Standard,
//!     explicit: None,
//!     confirmation_threshold: 1,
//!     lock_owner: None,
//! });
//! ```
//!
//! # Security Considerations
//!
//! - Available UTXOs represent funds controlled by the wallet
//! - Selection strategies can affect transaction privacy; output shuffling
//!   happens later in the assembler

pub mod selector;
pub mod strategies;
pub mod types;

pub use selector::UtxoSelector;
pub use types::{
    Selection, SelectionMode, SelectionParams, SelectionRequest, SelectionStrategy, Utxo,
};
