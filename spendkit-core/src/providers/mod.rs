//! External collaborators of the engine
//!
//! The engine reads wallets, addresses and UTXOs from directories it does not
//! own, and talks to the chain through a [`ChainSource`]. Each collaborator is a
//! trait so the server can plug in its database and Electrum/node clients while
//! tests use the in-memory implementations from [`memory`].
//!
//! # Security Considerations
//!
//! - Directories serve public data only (xpubs, addresses, outpoints)
//! - Chain-source failures are surfaced unchanged as transport errors; the
//!   engine never retries on its own

use bitcoin::{OutPoint, Transaction, Txid};
use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::types::{Wallet, WalletAddress};

use crate::utxo_selection::types::Utxo;

pub mod memory;

pub use memory::{MemoryChainSource, MemoryUtxoDirectory, MemoryWalletDirectory};

/// Wallet and address records
pub trait WalletDirectory: Send + Sync {
    /// Look up a wallet by id
    ///
    /// Returns `ResourceNotFound` for an unknown id.
    fn wallet(&self, wallet_id: &str) -> SpendResult<Wallet>;

    /// All address records of a wallet
    fn addresses(&self, wallet_id: &str) -> SpendResult<Vec<WalletAddress>>;

    /// Up to `count` unused change addresses, in stored order
    fn unused_change_addresses(&self, wallet_id: &str, count: usize) -> SpendResult<Vec<WalletAddress>> {
        Ok(self
            .addresses(wallet_id)?
            .into_iter()
            .filter(|address| address.is_change() && !address.used)
            .take(count)
            .collect())
    }
}

/// Per-wallet UTXO records
pub trait UtxoDirectory: Send + Sync {
    /// Every UTXO record of a wallet, including spent and frozen ones
    fn utxos(&self, wallet_id: &str) -> SpendResult<Vec<Utxo>>;

    /// Exact match by (txid, vout)
    fn find(&self, wallet_id: &str, outpoint: &OutPoint) -> SpendResult<Option<Utxo>> {
        Ok(self
            .utxos(wallet_id)?
            .into_iter()
            .find(|utxo| utxo.outpoint == *outpoint))
    }
}

/// Chain data client (Electrum, node RPC, ...)
pub trait ChainSource: Send + Sync {
    /// Fetch a raw previous transaction
    fn fetch_transaction(&self, txid: &Txid) -> SpendResult<Transaction>;

    /// Fetch several transactions; the default issues one request per id
    fn fetch_transactions(&self, txids: &[Txid]) -> SpendResult<Vec<Transaction>> {
        txids.iter().map(|txid| self.fetch_transaction(txid)).collect()
    }

    /// Submit a finalized transaction and return the id the network reports
    fn broadcast(&self, tx: &Transaction) -> SpendResult<Txid>;
}

/// Resolve a wallet, rejecting combinations the engine cannot build for
pub fn load_wallet(directory: &dyn WalletDirectory, wallet_id: &str) -> SpendResult<Wallet> {
    let wallet = directory.wallet(wallet_id)?;
    if wallet.id != wallet_id {
        return Err(SpendError::validation(format!(
            "Wallet directory returned wallet {} for id {}",
            wallet.id, wallet_id
        )));
    }
    wallet.validate()?;
    Ok(wallet)
}
