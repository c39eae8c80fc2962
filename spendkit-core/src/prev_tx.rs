//! Previous transaction fetching for legacy inputs
//!
//! Non-segwit inputs need the whole transaction they spend from, not just the
//! output, so a signer can check the amount. The distinct ids are split into
//! one batch per worker and each batch goes to
//! [`ChainSource::fetch_transactions`]. Workers are scoped threads fed through
//! a `crossbeam-channel` queue, capped at `prev_tx_fetch_concurrency`. Results
//! are keyed by txid, so arrival order does not matter.
//!
//! There are no retries: the first failed fetch aborts the build and its error
//! is returned unchanged.

use bitcoin::{Transaction, Txid};
use crossbeam_channel::unbounded;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::logging::short_txid;

use crate::providers::ChainSource;

/// Fetch every distinct transaction in `txids` with at most `concurrency`
/// requests in flight
///
/// # Returns
/// * A map from txid to transaction, one entry per distinct id
/// * The first chain-source error, unchanged
/// * `Transport` error when the source returns a different transaction than asked
pub fn fetch_previous_transactions(
    source: &dyn ChainSource,
    txids: &[Txid],
    concurrency: usize,
) -> SpendResult<HashMap<Txid, Transaction>> {
    let mut seen = HashSet::new();
    let unique: Vec<Txid> = txids.iter().copied().filter(|txid| seen.insert(*txid)).collect();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }

    let workers = concurrency.max(1).min(unique.len());
    debug!(
        "Fetching {} previous transactions with {} workers",
        unique.len(),
        workers
    );

    let batch_size = (unique.len() + workers - 1) / workers;
    let (job_tx, job_rx) = unbounded::<&[Txid]>();
    let (result_tx, result_rx) = unbounded::<(&[Txid], SpendResult<Vec<Transaction>>)>();
    for batch in unique.chunks(batch_size) {
        // The receiver is alive until the end of this function
        let _ = job_tx.send(batch);
    }
    drop(job_tx);

    let failed = AtomicBool::new(false);
    thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let failed = &failed;
            scope.spawn(move || {
                for batch in jobs.iter() {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let result = source.fetch_transactions(batch);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    if results.send((batch, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut fetched = HashMap::with_capacity(unique.len());
    for (batch, result) in result_rx.iter() {
        let txs = result?;
        if txs.len() != batch.len() {
            return Err(SpendError::transport(format!(
                "chain source returned {} transactions for a batch of {}",
                txs.len(),
                batch.len()
            )));
        }
        for (txid, tx) in batch.iter().zip(txs) {
            let actual = tx.txid();
            if actual != *txid {
                warn!(
                    "Chain source answered {} with {}",
                    short_txid(txid),
                    short_txid(&actual)
                );
                return Err(SpendError::transport(format!(
                    "chain source returned transaction {} for {}",
                    actual, txid
                )));
            }
            fetched.insert(*txid, tx);
        }
    }

    if fetched.len() != unique.len() {
        return Err(SpendError::transport(format!(
            "fetched {} of {} previous transactions",
            fetched.len(),
            unique.len()
        )));
    }
    Ok(fetched)
}
