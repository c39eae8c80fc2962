//! In-memory collaborators for embedding and tests

use bitcoin::{OutPoint, Transaction, Txid};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::logging::short_txid;
use spendkit_common::types::{Wallet, WalletAddress};

use super::{ChainSource, UtxoDirectory, WalletDirectory};
use crate::utxo_selection::types::Utxo;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wallets and addresses held in memory
#[derive(Debug, Default)]
pub struct MemoryWalletDirectory {
    wallets: RwLock<HashMap<String, Wallet>>,
    addresses: RwLock<HashMap<String, Vec<WalletAddress>>>,
}

impl MemoryWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a wallet
    pub fn insert_wallet(&self, wallet: Wallet) {
        let mut wallets = self.wallets.write().unwrap_or_else(|p| p.into_inner());
        wallets.insert(wallet.id.clone(), wallet);
    }

    /// Append an address record to its wallet
    pub fn insert_address(&self, address: WalletAddress) {
        let mut addresses = self.addresses.write().unwrap_or_else(|p| p.into_inner());
        addresses
            .entry(address.wallet_id.clone())
            .or_insert_with(Vec::new)
            .push(address);
    }

    /// Flag an address as used
    pub fn mark_used(&self, wallet_id: &str, address: &str) -> bool {
        let mut addresses = self.addresses.write().unwrap_or_else(|p| p.into_inner());
        match addresses
            .get_mut(wallet_id)
            .and_then(|records| records.iter_mut().find(|record| record.address == address))
        {
            Some(record) => {
                record.used = true;
                true
            }
            None => false,
        }
    }
}

impl WalletDirectory for MemoryWalletDirectory {
    fn wallet(&self, wallet_id: &str) -> SpendResult<Wallet> {
        let wallets = self.wallets.read().unwrap_or_else(|p| p.into_inner());
        wallets
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| SpendError::not_found("Wallet", wallet_id))
    }

    fn addresses(&self, wallet_id: &str) -> SpendResult<Vec<WalletAddress>> {
        let addresses = self.addresses.read().unwrap_or_else(|p| p.into_inner());
        Ok(addresses.get(wallet_id).cloned().unwrap_or_default())
    }
}

/// UTXO records held in memory
#[derive(Debug, Default)]
pub struct MemoryUtxoDirectory {
    utxos: RwLock<HashMap<String, Vec<Utxo>>>,
}

impl MemoryUtxoDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a UTXO to a wallet
    pub fn insert(&self, wallet_id: &str, utxo: Utxo) {
        let mut utxos = self.utxos.write().unwrap_or_else(|p| p.into_inner());
        utxos.entry(wallet_id.to_string()).or_insert_with(Vec::new).push(utxo);
    }

    /// Flag UTXOs as spent after a broadcast
    pub fn mark_spent(&self, wallet_id: &str, outpoints: &[OutPoint]) -> usize {
        let mut utxos = self.utxos.write().unwrap_or_else(|p| p.into_inner());
        let mut count = 0;
        if let Some(records) = utxos.get_mut(wallet_id) {
            for utxo in records.iter_mut().filter(|u| outpoints.contains(&u.outpoint)) {
                utxo.spent = true;
                count += 1;
            }
        }
        count
    }
}

impl UtxoDirectory for MemoryUtxoDirectory {
    fn utxos(&self, wallet_id: &str) -> SpendResult<Vec<Utxo>> {
        let utxos = self.utxos.read().unwrap_or_else(|p| p.into_inner());
        Ok(utxos.get(wallet_id).cloned().unwrap_or_default())
    }
}

/// Chain source serving transactions from memory and recording broadcasts
///
/// Tracks the peak number of concurrent fetches so callers can check the
/// fetch cap is honored.
#[derive(Debug, Default)]
pub struct MemoryChainSource {
    transactions: RwLock<HashMap<Txid, Transaction>>,
    broadcasts: Mutex<Vec<Transaction>>,
    broadcast_failure: Mutex<Option<String>>,
    fetch_delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fetch_count: AtomicUsize,
}

impl MemoryChainSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every fetch for `delay`, to make concurrent fetches overlap
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Make a transaction available for fetching
    pub fn insert_transaction(&self, tx: Transaction) {
        let mut transactions = self.transactions.write().unwrap_or_else(|p| p.into_inner());
        transactions.insert(tx.txid(), tx);
    }

    /// Make the next broadcasts fail with `message`
    pub fn fail_broadcasts(&self, message: &str) {
        *lock(&self.broadcast_failure) = Some(message.to_string());
    }

    /// Transactions accepted so far
    pub fn broadcasts(&self) -> Vec<Transaction> {
        lock(&self.broadcasts).clone()
    }

    /// Highest number of fetches observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Total number of fetches served or attempted
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl ChainSource for MemoryChainSource {
    fn fetch_transaction(&self, txid: &Txid) -> SpendResult<Transaction> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.fetch_delay {
            thread::sleep(delay);
        }

        let result = {
            let transactions = self.transactions.read().unwrap_or_else(|p| p.into_inner());
            transactions.get(txid).cloned().ok_or_else(|| {
                SpendError::transport(format!("transaction {} not found", short_txid(txid)))
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn broadcast(&self, tx: &Transaction) -> SpendResult<Txid> {
        if let Some(message) = lock(&self.broadcast_failure).clone() {
            return Err(SpendError::transport(message));
        }
        debug!("Accepted broadcast of {}", short_txid(&tx.txid()));
        lock(&self.broadcasts).push(tx.clone());
        Ok(tx.txid())
    }
}
