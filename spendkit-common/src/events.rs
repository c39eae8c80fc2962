//! Transaction lifecycle events
//!
//! The engine announces what it did on a [`TransactionEventBus`]: a bundle was
//! built, a finalized transaction was broadcast, or an input could not be
//! finalized. Listeners (UTXO bookkeeping, notification fan-out) subscribe by
//! event kind and receive events over `std::sync::mpsc` channels.
//!
//! ## Security Considerations
//!
//! - Events carry outpoints, amounts and the raw transaction hex, never keys
//! - A disconnected subscriber is dropped silently; publishing never blocks the
//!   engine and never fails a build

use bitcoin::OutPoint;
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

/// Subscription key matching every event
pub const ALL_EVENTS: &str = "all";

/// An output created by a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastOutput {
    /// Output position in the transaction
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// Destination address, when the script encodes one
    pub address: Option<String>,
}

/// Events published by the transaction engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEvent {
    /// An unsigned bundle was assembled
    Built {
        wallet_id: String,
        input_count: usize,
        output_count: usize,
        fee: u64,
    },
    /// A finalized transaction was accepted by the chain source
    Broadcast {
        txid: String,
        raw_hex: String,
        inputs: Vec<OutPoint>,
        outputs: Vec<BroadcastOutput>,
    },
    /// An input could not be turned into a final witness
    FinalizationFailed { input_index: usize, reason: String },
}

impl TransactionEvent {
    /// Subscription key of this event
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionEvent::Built { .. } => "built",
            TransactionEvent::Broadcast { .. } => "broadcast",
            TransactionEvent::FinalizationFailed { .. } => "finalization_failed",
        }
    }
}

type SubscriberMap = HashMap<String, Vec<Sender<TransactionEvent>>>;

/// Simple message bus for transaction events
#[derive(Clone, Default)]
pub struct TransactionEventBus {
    subscribers: Arc<Mutex<SubscriberMap>>,
}

impl TransactionEventBus {
    /// Create a new transaction event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all transaction events
    pub fn subscribe_all(&self) -> Receiver<TransactionEvent> {
        self.subscribe(ALL_EVENTS)
    }

    /// Subscribe to a specific kind of transaction event
    ///
    /// # Arguments
    ///
    /// * `kind` - "built", "broadcast", "finalization_failed", or "all"
    pub fn subscribe(&self, kind: &str) -> Receiver<TransactionEvent> {
        let (sender, receiver) = mpsc::channel();
        self.lock()
            .entry(kind.to_lowercase())
            .or_insert_with(Vec::new)
            .push(sender);
        receiver
    }

    /// Publish an event to subscribers of its kind and to "all" subscribers
    pub fn publish(&self, event: TransactionEvent) {
        let kind = event.kind();
        trace!("Publishing transaction event: {}", kind);

        let mut subscribers = self.lock();
        for key in [kind, ALL_EVENTS] {
            if let Some(senders) = subscribers.get_mut(key) {
                // Closed receivers are pruned
                senders.retain(|sender| sender.send(event.clone()).is_ok());
            }
        }
    }

    /// Number of live subscriptions for a kind
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.lock().get(&kind.to_lowercase()).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TransactionEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEventBus")
            .field("kinds", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(fee: u64) -> TransactionEvent {
        TransactionEvent::Built {
            wallet_id: "w1".to_string(),
            input_count: 1,
            output_count: 2,
            fee,
        }
    }

    #[test]
    fn delivers_to_kind_and_all_subscribers() {
        let bus = TransactionEventBus::new();
        let built_rx = bus.subscribe("built");
        let all_rx = bus.subscribe_all();
        let broadcast_rx = bus.subscribe("broadcast");

        bus.publish(built(1_460));

        assert_eq!(built_rx.try_recv().unwrap(), built(1_460));
        assert_eq!(all_rx.try_recv().unwrap(), built(1_460));
        assert!(broadcast_rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = TransactionEventBus::new();
        let rx = bus.subscribe("built");
        drop(rx);
        bus.publish(built(1));
        assert_eq!(bus.subscriber_count("built"), 0);
    }

    #[test]
    fn subscription_kind_is_case_insensitive() {
        let bus = TransactionEventBus::new();
        let rx = bus.subscribe("Finalization_Failed");
        bus.publish(TransactionEvent::FinalizationFailed {
            input_index: 0,
            reason: "missing witness script".to_string(),
        });
        assert!(rx.try_recv().is_ok());
    }
}
