//! Spendkit Core
//!
//! Transaction construction and finalization engine for a Bitcoin wallet
//! server. Builds unsigned bundles for hardware signers and finalizes the
//! signatures they return.
//!
//! # Modules
//!
//! - `providers`: wallet, UTXO and chain-source traits with in-memory versions
//! - `utxo_selection`: input selection strategies and modes
//! - `derivation`: paths, extended keys, descriptors, key metadata, addresses
//! - `multisig`: sorted multisig scripts
//! - `decoy`: randomized change splitting
//! - `assembler`: the build pipeline
//! - `finalizer`: signature assembly and extraction
//! - `decode`: read-only bundle summaries
//! - `broadcast`: submission and broadcast events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use spendkit_common::config::StaticSettings;
//! use spendkit_core::assembler::{BuildRequest, TransactionAssembler};
//! use spendkit_core::providers::{MemoryChainSource, MemoryUtxoDirectory, MemoryWalletDirectory};
//!
//! let assembler = TransactionAssembler::new(
//!     Arc::new(MemoryWalletDirectory::new()),
//!     Arc::new(MemoryUtxoDirectory::new()),
//!     Arc::new(MemoryChainSource::new()),
//!     Arc::new(StaticSettings::default()),
//! );
//! let request = BuildRequest::send("wallet-1", "tb1q...", 50_000, dec!(10));
//! let result = assembler.build(&request);
//! ```
//!
//! # Security Considerations
//!
//! - No private keys are held and nothing is signed here
//! - Output order is randomized on every build

pub mod assembler;
pub mod broadcast;
pub mod decode;
pub mod decoy;
pub mod derivation;
pub mod finalizer;
pub mod multisig;
pub mod prev_tx;
pub mod providers;
pub mod utxo_selection;

pub use assembler::{BuildRequest, BuildResult, OutputKind, Recipient, TransactionAssembler};
pub use broadcast::Broadcaster;
pub use decode::{decode_bundle, BundleSummary};
pub use derivation::{derive_multisig_address, derive_single_sig_address, DerivationOutcome};
pub use finalizer::{extract_transaction, FinalizationSummary, FinalizedTransaction, Finalizer};
pub use utxo_selection::{SelectionMode, SelectionStrategy, UtxoSelector};
