//! Shared fixtures for the engine integration tests
//!
//! Keys come from fixed seeds so every run derives the same addresses. Nothing
//! here talks to a network.

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Once};

use bitcoin::bip32::{ChildNumber, DerivationPath, ExtendedPrivKey, ExtendedPubKey, Fingerprint};
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::psbt::PartiallySignedTransaction;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use spendkit_common::config::{EngineSettings, StaticSettings};
use spendkit_common::events::TransactionEventBus;
use spendkit_common::types::{ScriptType, SigType, SigningDevice, Wallet, WalletAddress};
use spendkit_core::assembler::TransactionAssembler;
use spendkit_core::derivation::{derive_multisig_address, derive_single_sig_address};
use spendkit_core::providers::{MemoryChainSource, MemoryUtxoDirectory, MemoryWalletDirectory};
use spendkit_core::utxo_selection::Utxo;

pub const NETWORK: Network = Network::Testnet;

static INIT: Once = Once::new();

/// Quiet logging shared by every test in a binary
pub fn init_test_environment() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A signer with a deterministic master key
#[derive(Debug, Clone)]
pub struct Cosigner {
    pub fingerprint: Fingerprint,
    pub account_path: DerivationPath,
    pub account: ExtendedPrivKey,
    pub xpub: ExtendedPubKey,
}

impl Cosigner {
    pub fn new(seed: u8, account_path: &str) -> Self {
        let secp = Secp256k1::new();
        let master = ExtendedPrivKey::new_master(NETWORK, &[seed; 32]).unwrap();
        let account_path = DerivationPath::from_str(account_path).unwrap();
        let account = master.derive_priv(&secp, &account_path).unwrap();
        Self {
            fingerprint: master.fingerprint(&secp),
            xpub: ExtendedPubKey::from_priv(&secp, &account),
            account_path,
            account,
        }
    }

    /// `[fingerprint/path]tpub.../<suffix>` for descriptors
    pub fn key_expression(&self) -> String {
        let path = self.account_path.to_string();
        let path = path.trim_start_matches("m/").replace('\'', "h");
        format!("[{}/{}]{}/0/*", self.fingerprint, path, self.xpub)
    }

    pub fn secret_at(&self, change: u32, index: u32) -> SecretKey {
        let secp = Secp256k1::new();
        let steps = [
            ChildNumber::from_normal_idx(change).unwrap(),
            ChildNumber::from_normal_idx(index).unwrap(),
        ];
        self.account.derive_priv(&secp, &steps).unwrap().private_key
    }

    pub fn pubkey_at(&self, change: u32, index: u32) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &self.secret_at(change, index))
    }

    /// Full path of an address under this account
    pub fn address_path(&self, change: u32, index: u32) -> String {
        format!("{}/{}/{}", self.account_path, change, index)
    }
}

pub fn sortedmulti_descriptor(script_type: ScriptType, threshold: usize, cosigners: &[Cosigner]) -> String {
    let keys: Vec<String> = cosigners.iter().map(Cosigner::key_expression).collect();
    let inner = format!("sortedmulti({},{})", threshold, keys.join(","));
    match script_type {
        ScriptType::NativeSegwit => format!("wsh({})", inner),
        ScriptType::NestedSegwit => format!("sh(wsh({}))", inner),
        ScriptType::Legacy => format!("sh({})", inner),
        ScriptType::Taproot => panic!("no taproot multisig descriptors"),
    }
}

/// A destination outside every fixture wallet
pub fn external_address() -> String {
    let outsider = Cosigner::new(0xee, "m/84'/1'/0'");
    derive_single_sig_address(&outsider.xpub.to_string(), 0, 0, ScriptType::NativeSegwit, NETWORK)
        .unwrap()
        .to_string()
}

pub fn txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

/// A wallet with its collaborators in memory
pub struct Fixture {
    pub wallet: Wallet,
    pub cosigners: Vec<Cosigner>,
    pub threshold: usize,
    pub wallets: Arc<MemoryWalletDirectory>,
    pub utxos: Arc<MemoryUtxoDirectory>,
    pub chain: Arc<MemoryChainSource>,
    pub events: TransactionEventBus,
    pub settings: EngineSettings,
}

impl Fixture {
    pub fn single_sig(script_type: ScriptType) -> Self {
        let purpose = match script_type {
            ScriptType::Legacy => 44,
            ScriptType::NestedSegwit => 49,
            ScriptType::NativeSegwit => 84,
            ScriptType::Taproot => 86,
        };
        let cosigner = Cosigner::new(1, &format!("m/{}'/1'/0'", purpose));
        let wallet = Wallet {
            id: "single".to_string(),
            sig_type: SigType::Single,
            script_type,
            network: NETWORK,
            descriptor: None,
            devices: vec![SigningDevice {
                fingerprint: Some(cosigner.fingerprint.to_string()),
                xpub: Some(cosigner.xpub.to_string()),
                derivation_path: Some(cosigner.account_path.to_string()),
            }],
        };
        Self::with_wallet(wallet, vec![cosigner], 1)
    }

    pub fn multisig(script_type: ScriptType, threshold: usize, total: u8) -> Self {
        let cosigners: Vec<Cosigner> = (1..=total)
            .map(|seed| Cosigner::new(seed, "m/48'/1'/0'/2'"))
            .collect();
        let wallet = Wallet {
            id: "multi".to_string(),
            sig_type: SigType::Multi,
            script_type,
            network: NETWORK,
            descriptor: Some(sortedmulti_descriptor(script_type, threshold, &cosigners)),
            devices: Vec::new(),
        };
        Self::with_wallet(wallet, cosigners, threshold)
    }

    fn with_wallet(wallet: Wallet, cosigners: Vec<Cosigner>, threshold: usize) -> Self {
        init_test_environment();
        let fixture = Self {
            wallets: Arc::new(MemoryWalletDirectory::new()),
            utxos: Arc::new(MemoryUtxoDirectory::new()),
            chain: Arc::new(MemoryChainSource::new()),
            events: TransactionEventBus::new(),
            settings: EngineSettings::default(),
            wallet,
            cosigners,
            threshold,
        };
        fixture.wallets.insert_wallet(fixture.wallet.clone());
        for index in 0..8 {
            fixture.register_address(0, index);
        }
        for index in 0..4 {
            fixture.register_address(1, index);
        }
        fixture
    }

    /// Address string at `change/index`
    pub fn address(&self, change: u32, index: u32) -> String {
        let script_type = self.wallet.script_type;
        let address = if self.wallet.is_multisig() {
            let xpubs: Vec<String> = self.cosigners.iter().map(|c| c.xpub.to_string()).collect();
            let refs: Vec<&str> = xpubs.iter().map(String::as_str).collect();
            derive_multisig_address(&refs, self.threshold, change, index, script_type, NETWORK)
        } else {
            derive_single_sig_address(&self.cosigners[0].xpub.to_string(), change, index, script_type, NETWORK)
        };
        address.unwrap().to_string()
    }

    pub fn script_pubkey(&self, change: u32, index: u32) -> ScriptBuf {
        spendkit_core::assembler::parse_address(&self.address(change, index), NETWORK)
            .unwrap()
            .script_pubkey()
    }

    pub fn register_address(&self, change: u32, index: u32) {
        self.wallets.insert_address(WalletAddress {
            address: self.address(change, index),
            derivation_path: self.cosigners[0].address_path(change, index),
            used: false,
            chain: change,
            wallet_id: self.wallet.id.clone(),
        });
    }

    /// Fund the receive address at `index` with a confirmed UTXO
    ///
    /// Legacy wallets also get the previous transaction in the chain source.
    pub fn fund(&self, seed: u8, amount: u64, index: u32) -> Utxo {
        let script_pubkey = self.script_pubkey(0, index);
        let outpoint = if self.wallet.script_type.is_segwit() {
            OutPoint::new(txid(seed), 0)
        } else {
            let prev = Transaction {
                version: 2,
                lock_time: bitcoin::absolute::LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: OutPoint::new(txid(seed), 7),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::default(),
                }],
                output: vec![TxOut {
                    value: amount,
                    script_pubkey: script_pubkey.clone(),
                }],
            };
            let outpoint = OutPoint::new(prev.txid(), 0);
            self.chain.insert_transaction(prev);
            outpoint
        };

        let utxo = Utxo::new(outpoint, amount, script_pubkey, self.address(0, index))
            .unwrap()
            .with_confirmations(6);
        self.utxos.insert(&self.wallet.id, utxo.clone());
        utxo
    }

    /// Replace the chain source; call before funding legacy wallets
    pub fn with_chain(mut self, chain: MemoryChainSource) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn assembler(&self) -> TransactionAssembler {
        TransactionAssembler::new(
            self.wallets.clone(),
            self.utxos.clone(),
            self.chain.clone(),
            Arc::new(StaticSettings::new(self.settings.clone())),
        )
        .with_event_bus(self.events.clone())
    }
}

/// Sign a segwit v0 multisig input the way a hardware signer would
pub fn sign_multisig_input(
    psbt: &mut PartiallySignedTransaction,
    index: usize,
    secret: &SecretKey,
) {
    let witness_script = psbt.inputs[index].witness_script.clone().unwrap();
    let value = psbt.inputs[index].witness_utxo.as_ref().unwrap().value;
    let sighash = SighashCache::new(&psbt.unsigned_tx)
        .segwit_signature_hash(index, &witness_script, value, EcdsaSighashType::All)
        .unwrap();
    insert_signature(psbt, index, secret, &sighash[..]);
}

/// Sign a P2WPKH input
pub fn sign_wpkh_input(psbt: &mut PartiallySignedTransaction, index: usize, secret: &SecretKey) {
    let secp = Secp256k1::new();
    let key = bitcoin::PublicKey::new(PublicKey::from_secret_key(&secp, secret));
    let script_code = ScriptBuf::new_p2pkh(&key.pubkey_hash());
    let value = psbt.inputs[index].witness_utxo.as_ref().unwrap().value;
    let sighash = SighashCache::new(&psbt.unsigned_tx)
        .segwit_signature_hash(index, &script_code, value, EcdsaSighashType::All)
        .unwrap();
    insert_signature(psbt, index, secret, &sighash[..]);
}

fn insert_signature(psbt: &mut PartiallySignedTransaction, index: usize, secret: &SecretKey, digest: &[u8]) {
    let secp = Secp256k1::new();
    let message = Message::from_slice(digest).unwrap();
    let signature = ecdsa::Signature {
        sig: secp.sign_ecdsa(&message, secret),
        hash_ty: EcdsaSighashType::All,
    };
    let key = bitcoin::PublicKey::new(PublicKey::from_secret_key(&secp, secret));
    psbt.inputs[index].partial_sigs.insert(key, signature);
}
