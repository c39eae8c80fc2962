use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Txid};
use spendkit_common::events::{BroadcastOutput, TransactionEvent, TransactionEventBus};
use std::thread;

#[test]
fn subscribers_on_other_threads_receive_broadcasts() {
    let bus = TransactionEventBus::new();
    let rx = bus.subscribe("broadcast");

    let publisher = bus.clone();
    let handle = thread::spawn(move || {
        publisher.publish(TransactionEvent::Broadcast {
            txid: "ab".repeat(32),
            raw_hex: "0200".to_string(),
            inputs: vec![OutPoint::new(Txid::all_zeros(), 1)],
            outputs: vec![BroadcastOutput {
                vout: 0,
                value: 50_000,
                address: None,
            }],
        });
    });
    handle.join().expect("publisher thread panicked");

    match rx.recv().expect("no event") {
        TransactionEvent::Broadcast { inputs, outputs, .. } => {
            assert_eq!(inputs, vec![OutPoint::new(Txid::all_zeros(), 1)]);
            assert_eq!(outputs[0].value, 50_000);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn events_serialize_to_json() {
    let event = TransactionEvent::FinalizationFailed {
        input_index: 2,
        reason: "signature count mismatch".to_string(),
    };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("FinalizationFailed"));
    assert!(json.contains("signature count mismatch"));
}
