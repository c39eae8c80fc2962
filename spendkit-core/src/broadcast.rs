//! Broadcast submission
//!
//! Hands a finalized transaction to the chain source and announces it. The
//! engine does not mark UTXOs spent or record history itself: ledger and
//! notification collaborators subscribe to the `broadcast` event.
//!
//! Submission and persistence are not atomic. Once the chain source accepts a
//! transaction the funds are gone even if a subscriber later fails.

use bitcoin::{Address, Network, Txid};
use log::{error, info};
use std::sync::Arc;

use spendkit_common::error::{SpendError, SpendResult};
use spendkit_common::events::{BroadcastOutput, TransactionEvent, TransactionEventBus};
use spendkit_common::logging::short_txid;

use crate::finalizer::{FinalizedTransaction, Finalizer};
use crate::providers::ChainSource;

/// Submits finalized transactions
pub struct Broadcaster {
    chain: Arc<dyn ChainSource>,
    network: Network,
    events: Option<TransactionEventBus>,
}

impl Broadcaster {
    pub fn new(chain: Arc<dyn ChainSource>, network: Network) -> Self {
        Self {
            chain,
            network,
            events: None,
        }
    }

    /// Publish `Broadcast` events on success
    pub fn with_event_bus(mut self, events: TransactionEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Submit a finalized transaction
    ///
    /// # Returns
    /// * The txid the chain source reported
    /// * The chain source's error unchanged; there are no retries
    /// * `Transport` error if the reported txid differs from the transaction's
    pub fn broadcast(&self, finalized: &FinalizedTransaction) -> SpendResult<Txid> {
        let reported = self.chain.broadcast(&finalized.tx)?;
        if reported != finalized.txid {
            error!(
                "Chain source reported {} for transaction {}",
                short_txid(&reported),
                short_txid(&finalized.txid)
            );
            return Err(SpendError::transport(format!(
                "chain source reported txid {} for {}",
                reported, finalized.txid
            )));
        }
        info!("Broadcast transaction {}", short_txid(&reported));

        if let Some(events) = &self.events {
            events.publish(self.broadcast_event(finalized));
        }
        Ok(reported)
    }

    /// Extract a signed bundle or raw transaction and submit it
    pub fn broadcast_signed(&self, signed: &str) -> SpendResult<Txid> {
        let mut finalizer = Finalizer::new();
        if let Some(events) = &self.events {
            finalizer = finalizer.with_event_bus(events.clone());
        }
        let finalized = finalizer.extract(signed)?;
        self.broadcast(&finalized)
    }

    fn broadcast_event(&self, finalized: &FinalizedTransaction) -> TransactionEvent {
        TransactionEvent::Broadcast {
            txid: finalized.txid.to_string(),
            raw_hex: finalized.raw_hex.clone(),
            inputs: finalized.tx.input.iter().map(|txin| txin.previous_output).collect(),
            outputs: finalized
                .tx
                .output
                .iter()
                .enumerate()
                .map(|(vout, out)| BroadcastOutput {
                    vout: vout as u32,
                    value: out.value,
                    address: Address::from_script(&out.script_pubkey, self.network)
                        .ok()
                        .map(|address| address.to_string()),
                })
                .collect(),
        }
    }
}
