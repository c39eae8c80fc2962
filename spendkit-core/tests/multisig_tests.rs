//! Multisig metadata, descriptor handling, finalization and broadcast

mod common;

use std::collections::BTreeMap;

use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::secp256k1::PublicKey;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal_macros::dec;

use common::{external_address, sign_multisig_input, sign_wpkh_input, sortedmulti_descriptor, Cosigner, Fixture, NETWORK};
use spendkit_common::error::SpendError;
use spendkit_common::events::TransactionEvent;
use spendkit_common::types::{ScriptType, WalletAddress};
use spendkit_core::assembler::{BuildRequest, BuildResult, OutputKind};
use spendkit_core::broadcast::Broadcaster;
use spendkit_core::derivation::descriptor::parse_multisig_descriptor;
use spendkit_core::derivation::derive_multisig_address;
use spendkit_core::derivation::resolver::DerivationOutcome;
use spendkit_core::finalizer::{extract_transaction, Finalizer};
use spendkit_core::multisig::sorted_multisig_script;

fn build_spend(fixture: &Fixture, index: u32) -> BuildResult {
    fixture.fund(1, 200_000, index);
    let request = BuildRequest::send(fixture.wallet.id.clone(), external_address(), 50_000, dec!(10));
    fixture
        .assembler()
        .build_with_rng(&request, &mut StdRng::seed_from_u64(3))
        .unwrap()
}

fn sorted_keys(fixture: &Fixture, change: u32, index: u32) -> Vec<PublicKey> {
    let mut keys: Vec<PublicKey> = fixture.cosigners.iter().map(|c| c.pubkey_at(change, index)).collect();
    keys.sort_by_key(|key| key.serialize());
    keys
}

/// Signatures in the order the witness must carry them
fn expected_signature_order(psbt: &PartiallySignedTransaction, index: usize, script_keys: &[PublicKey]) -> Vec<Vec<u8>> {
    let by_key: BTreeMap<Vec<u8>, Vec<u8>> = psbt.inputs[index]
        .partial_sigs
        .iter()
        .map(|(key, sig)| (key.inner.serialize().to_vec(), sig.to_vec()))
        .collect();
    script_keys
        .iter()
        .filter_map(|key| by_key.get(&key.serialize().to_vec()).cloned())
        .collect()
}

#[test]
fn multisig_inputs_carry_every_cosigner() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let result = build_spend(&fixture, 5);

    let input = &result.psbt.inputs[0];
    assert_eq!(input.bip32_derivation.len(), 3);
    for cosigner in &fixture.cosigners {
        let (fingerprint, path) = &input.bip32_derivation[&cosigner.pubkey_at(0, 5)];
        assert_eq!(*fingerprint, cosigner.fingerprint);
        assert_eq!(path.to_string(), "m/48'/1'/0'/2'/0/5");
    }

    let expected_script = sorted_multisig_script(2, &sorted_keys(&fixture, 0, 5)).unwrap();
    assert_eq!(input.witness_script.as_ref(), Some(&expected_script));
    assert_eq!(expected_script.to_v0_p2wsh(), fixture.script_pubkey(0, 5));
    assert_eq!(result.inputs[0].derivation.origins().len(), 3);

    let change = &result.psbt.outputs[result
        .outputs
        .iter()
        .position(|o| o.kind == OutputKind::Change)
        .unwrap()];
    assert_eq!(change.bip32_derivation.len(), 3);
    let change_script = sorted_multisig_script(2, &sorted_keys(&fixture, 1, 0)).unwrap();
    assert_eq!(change.witness_script.as_ref(), Some(&change_script));
}

#[test]
fn mismatched_address_path_omits_multisig_metadata() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    // Record for receive address 9 that claims index 2
    fixture.wallets.insert_address(WalletAddress {
        address: fixture.address(0, 9),
        derivation_path: fixture.cosigners[0].address_path(0, 2),
        used: false,
        chain: 0,
        wallet_id: fixture.wallet.id.clone(),
    });
    let result = build_spend(&fixture, 9);

    match &result.inputs[0].derivation {
        DerivationOutcome::NotAttached { reason } => {
            assert!(reason.contains("does not match the output script"), "{}", reason)
        }
        other => panic!("expected no metadata, got {:?}", other),
    }
    let input = &result.psbt.inputs[0];
    assert!(input.bip32_derivation.is_empty());
    assert!(input.witness_script.is_none());
    assert!(input.witness_utxo.is_some());
}

#[test]
fn nested_multisig_inputs_carry_both_scripts() {
    let fixture = Fixture::multisig(ScriptType::NestedSegwit, 2, 3);
    let result = build_spend(&fixture, 0);

    let input = &result.psbt.inputs[0];
    let witness_script = input.witness_script.clone().unwrap();
    let redeem_script = input.redeem_script.clone().unwrap();
    assert_eq!(redeem_script, witness_script.to_v0_p2wsh());
    assert_eq!(redeem_script.to_p2sh(), fixture.script_pubkey(0, 0));
    assert!(input.witness_utxo.is_some());
}

#[test]
fn multisig_address_ignores_key_order() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let xpubs: Vec<String> = fixture.cosigners.iter().map(|c| c.xpub.to_string()).collect();
    let mut refs: Vec<&str> = xpubs.iter().map(String::as_str).collect();

    let forward = derive_multisig_address(&refs, 2, 0, 4, ScriptType::NativeSegwit, NETWORK).unwrap();
    refs.reverse();
    let reversed = derive_multisig_address(&refs, 2, 0, 4, ScriptType::NativeSegwit, NETWORK).unwrap();
    assert_eq!(forward, reversed);
    assert_eq!(forward.to_string(), fixture.address(0, 4));
}

#[test]
fn descriptor_parsing_is_stable() {
    let cosigners: Vec<Cosigner> = (1..=3).map(|seed| Cosigner::new(seed, "m/48'/1'/0'/2'")).collect();
    let descriptor = sortedmulti_descriptor(ScriptType::NativeSegwit, 2, &cosigners);

    let first = parse_multisig_descriptor(&descriptor).unwrap();
    let second = parse_multisig_descriptor(&descriptor).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.quorum.required, 2);
    assert_eq!(first.quorum.total, 3);
    assert_eq!(first.script_type, ScriptType::NativeSegwit);

    let fingerprints: Vec<_> = first.cosigners.iter().map(|c| c.fingerprint.unwrap()).collect();
    let declared: Vec<_> = cosigners.iter().map(|c| c.fingerprint).collect();
    assert_eq!(fingerprints, declared);
}

#[test]
fn descriptor_checksum_is_verified() {
    let cosigners: Vec<Cosigner> = (1..=2).map(|seed| Cosigner::new(seed, "m/48'/1'/0'/2'")).collect();
    let descriptor = sortedmulti_descriptor(ScriptType::NestedSegwit, 2, &cosigners);
    let checksum = bdk::descriptor::calc_checksum(&descriptor).unwrap();

    let parsed = parse_multisig_descriptor(&format!("{}#{}", descriptor, checksum)).unwrap();
    assert_eq!(parsed.script_type, ScriptType::NestedSegwit);

    let result = parse_multisig_descriptor(&format!("{}#{}", descriptor, "qqqqqqqq"));
    assert!(matches!(result, Err(SpendError::Validation(_))));
}

#[test]
fn unsupported_descriptors_are_rejected() {
    let cosigners: Vec<Cosigner> = (1..=2).map(|seed| Cosigner::new(seed, "m/48'/1'/0'/2'")).collect();
    let keys: Vec<String> = cosigners.iter().map(Cosigner::key_expression).collect();

    let unsorted = format!("wsh(multi(2,{}))", keys.join(","));
    assert!(matches!(parse_multisig_descriptor(&unsorted), Err(SpendError::Validation(_))));

    let impossible = format!("wsh(sortedmulti(3,{}))", keys.join(","));
    assert!(parse_multisig_descriptor(&impossible).is_err());

    let single = format!("wpkh({})", keys[0]);
    assert!(matches!(parse_multisig_descriptor(&single), Err(SpendError::Validation(_))));
}

#[test]
fn descriptor_flavor_must_match_the_wallet() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut wallet = fixture.wallet.clone();
    wallet.script_type = ScriptType::NestedSegwit;
    fixture.wallets.insert_wallet(wallet);
    fixture.fund(1, 200_000, 0);

    let request = BuildRequest::send("multi", external_address(), 50_000, dec!(10));
    let result = fixture.assembler().build(&request);
    assert!(matches!(result, Err(SpendError::Validation(_))));
}

#[test]
fn finalization_orders_signatures_by_script_keys() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 5).psbt;
    let outsider = Cosigner::new(0x99, "m/48'/1'/0'/2'");

    // Signed out of key order, plus a key the script does not contain
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[2].secret_at(0, 5));
    sign_multisig_input(&mut psbt, 0, &outsider.secret_at(0, 5));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 5));
    let expected = expected_signature_order(&psbt, 0, &sorted_keys(&fixture, 0, 5));
    assert_eq!(expected.len(), 2);

    let summary = Finalizer::new().finalize(&mut psbt).unwrap();
    assert_eq!(summary.finalized, vec![0]);
    assert!(summary.is_complete());

    let input = &psbt.inputs[0];
    let witness = input.final_script_witness.as_ref().unwrap().to_vec();
    assert_eq!(witness.len(), 4);
    assert!(witness[0].is_empty());
    assert_eq!(&witness[1..3], &expected[..]);
    assert_eq!(witness[3], sorted_multisig_script(2, &sorted_keys(&fixture, 0, 5)).unwrap().to_bytes());

    assert!(input.partial_sigs.is_empty());
    assert!(input.bip32_derivation.is_empty());
    assert!(input.witness_script.is_none());
    assert!(input.final_script_sig.is_none());
}

#[test]
fn any_quorum_of_cosigners_finalizes() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let unsigned = build_spend(&fixture, 1).psbt;

    for pair in [[0usize, 1], [0, 2], [2, 1]] {
        let mut psbt = unsigned.clone();
        for signer in pair {
            sign_multisig_input(&mut psbt, 0, &fixture.cosigners[signer].secret_at(0, 1));
        }
        let summary = Finalizer::new().finalize(&mut psbt).unwrap();
        assert!(summary.is_complete(), "pair {:?}", pair);
    }
}

#[test]
fn already_final_inputs_are_left_alone() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 0));

    let finalizer = Finalizer::new();
    finalizer.finalize(&mut psbt).unwrap();
    let witness = psbt.inputs[0].final_script_witness.clone();

    let summary = finalizer.finalize(&mut psbt).unwrap();
    assert_eq!(summary.already_final, vec![0]);
    assert!(summary.finalized.is_empty());
    assert_eq!(psbt.inputs[0].final_script_witness, witness);
}

#[test]
fn too_few_signatures_fail_with_an_event() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 0));
    let failures = fixture.events.subscribe("finalization_failed");

    let finalizer = Finalizer::new().with_event_bus(fixture.events.clone());
    let err = finalizer.finalize(&mut psbt).unwrap_err();
    assert!(matches!(err, SpendError::Finalization(_)));
    assert!(psbt.inputs[0].final_script_witness.is_none());

    match failures.try_recv().unwrap() {
        TransactionEvent::FinalizationFailed { input_index, reason } => {
            assert_eq!(input_index, 0);
            assert!(reason.contains("2-of-3"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn every_cosigner_signing_is_rejected() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    for cosigner in &fixture.cosigners {
        sign_multisig_input(&mut psbt, 0, &cosigner.secret_at(0, 0));
    }

    let err = Finalizer::new().finalize(&mut psbt).unwrap_err();
    assert!(matches!(err, SpendError::Finalization(_)));
}

#[test]
fn missing_witness_script_fails() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 0));
    psbt.inputs[0].witness_script = None;

    let err = Finalizer::new().finalize(&mut psbt).unwrap_err();
    assert!(matches!(err, SpendError::Finalization(_)));
    assert!(psbt.inputs[0].final_script_witness.is_none());
}

#[test]
fn wrong_witness_script_fails() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 0));
    psbt.inputs[0].witness_script = Some(sorted_multisig_script(2, &sorted_keys(&fixture, 0, 1)).unwrap());

    let err = Finalizer::new().finalize(&mut psbt).unwrap_err();
    assert!(matches!(err, SpendError::Finalization(_)));
}

#[test]
fn nested_multisig_finalizes_with_a_script_sig() {
    let fixture = Fixture::multisig(ScriptType::NestedSegwit, 2, 3);
    let mut psbt = build_spend(&fixture, 2).psbt;
    let redeem_script = psbt.inputs[0].redeem_script.clone().unwrap();
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 2));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[2].secret_at(0, 2));

    let summary = Finalizer::new().finalize(&mut psbt).unwrap();
    assert!(summary.is_complete());

    let input = &psbt.inputs[0];
    assert_eq!(input.final_script_witness.as_ref().unwrap().len(), 4);
    let script_sig = input.final_script_sig.as_ref().unwrap().to_bytes();
    assert_eq!(script_sig[0] as usize, redeem_script.len());
    assert_eq!(&script_sig[1..], redeem_script.as_bytes());
    assert!(input.redeem_script.is_none());
}

#[test]
fn bare_p2sh_multisig_stays_pending() {
    let fixture = Fixture::multisig(ScriptType::Legacy, 2, 3);
    let mut psbt = build_spend(&fixture, 0).psbt;
    assert!(psbt.inputs[0].non_witness_utxo.is_some());
    assert!(psbt.inputs[0].redeem_script.is_some());

    let summary = Finalizer::new().finalize(&mut psbt).unwrap();
    assert_eq!(summary.pending, vec![0]);

    let encoded = base64::encode(psbt.serialize());
    assert!(matches!(extract_transaction(&encoded), Err(SpendError::Finalization(_))));
}

#[test]
fn extraction_accepts_bundles_and_raw_hex() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let result = build_spend(&fixture, 0);
    let mut psbt = result.psbt.clone();
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[2].secret_at(0, 0));

    let finalized = extract_transaction(&base64::encode(psbt.serialize())).unwrap();
    assert_eq!(finalized.txid, result.psbt.unsigned_tx.txid());
    assert_eq!(finalized.tx.input[0].witness.len(), 4);
    assert_eq!(finalized.raw_hex, hex::encode(&finalized.raw));

    let again = extract_transaction(&finalized.raw_hex).unwrap();
    assert_eq!(again, finalized);

    let unsigned = extract_transaction(&result.psbt_base64);
    assert!(matches!(unsigned, Err(SpendError::Finalization(_))));
    assert!(matches!(extract_transaction("  "), Err(SpendError::Validation(_))));
    assert!(extract_transaction("not a transaction").is_err());
}

#[test]
fn single_sig_bundles_finalize() {
    let fixture = Fixture::single_sig(ScriptType::NativeSegwit);
    let result = build_spend(&fixture, 0);
    let mut psbt = result.psbt.clone();
    sign_wpkh_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));

    let finalized = extract_transaction(&base64::encode(psbt.serialize())).unwrap();
    let witness = finalized.tx.input[0].witness.to_vec();
    assert_eq!(witness.len(), 2);
    assert_eq!(witness[1], fixture.cosigners[0].pubkey_at(0, 0).serialize().to_vec());
    assert_eq!(finalized.txid, result.psbt.unsigned_tx.txid());
}

#[test]
fn broadcast_publishes_the_spend() {
    let fixture = Fixture::multisig(ScriptType::NativeSegwit, 2, 3);
    let result = build_spend(&fixture, 0);
    let mut psbt = result.psbt.clone();
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    sign_multisig_input(&mut psbt, 0, &fixture.cosigners[1].secret_at(0, 0));
    let broadcasts = fixture.events.subscribe("broadcast");

    let broadcaster = Broadcaster::new(fixture.chain.clone(), NETWORK).with_event_bus(fixture.events.clone());
    let txid = broadcaster.broadcast_signed(&base64::encode(psbt.serialize())).unwrap();

    assert_eq!(txid, result.psbt.unsigned_tx.txid());
    assert_eq!(fixture.chain.broadcasts().len(), 1);

    match broadcasts.try_recv().unwrap() {
        TransactionEvent::Broadcast {
            txid: event_txid,
            inputs,
            outputs,
            ..
        } => {
            assert_eq!(event_txid, txid.to_string());
            assert_eq!(inputs, vec![result.psbt.unsigned_tx.input[0].previous_output]);
            assert_eq!(outputs.len(), 2);
            let recipient = external_address();
            assert!(outputs
                .iter()
                .any(|o| o.address.as_deref() == Some(recipient.as_str()) && o.value == 50_000));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn rejected_broadcast_is_a_transport_error() {
    let fixture = Fixture::single_sig(ScriptType::NativeSegwit);
    let mut psbt = build_spend(&fixture, 0).psbt;
    sign_wpkh_input(&mut psbt, 0, &fixture.cosigners[0].secret_at(0, 0));
    fixture.chain.fail_broadcasts("node unreachable");
    let broadcasts = fixture.events.subscribe("broadcast");

    let broadcaster = Broadcaster::new(fixture.chain.clone(), NETWORK).with_event_bus(fixture.events.clone());
    let err = broadcaster.broadcast_signed(&base64::encode(psbt.serialize())).unwrap_err();

    assert!(matches!(err, SpendError::Transport { .. }));
    assert!(broadcasts.try_recv().is_err());
    assert!(fixture.chain.broadcasts().is_empty());
}
