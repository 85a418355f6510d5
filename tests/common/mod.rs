//! Shared fixtures: an in-memory Electrum server and wallet constructors.

#![allow(dead_code)]

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use satchel::electrum::{Connector, ElectrumBackend, ElectrumError, HistoryEntry};
use satchel::keys::{self, KeyMaterial, WalletDescriptor};
use satchel::{ElectrumClient, ExtendedKey, Network, SyncProgress, Wallet};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn key(network: Network) -> ExtendedKey {
    KeyMaterial::restore(network, TEST_MNEMONIC).expect("restore test mnemonic")
}

pub fn open_wallet(path: &Path, network: Network) -> Wallet {
    let key = key(network);
    Wallet::initialize(&keys::receive_descriptor(&key), &keys::change_descriptor(&key), network, path)
        .expect("initialize wallet")
}

/// Receive address of an unrelated wallet.
pub fn foreign_address(network: Network, index: u32) -> String {
    let other = KeyMaterial::restore_with_passphrase(network, TEST_MNEMONIC, "someone else").expect("restore");
    let desc = WalletDescriptor::parse(&keys::receive_descriptor(&other), network).expect("parse");
    desc.derive(index).expect("derive").address.to_string()
}

pub fn no_progress(_: SyncProgress) {}

struct ChainTx {
    tx: Transaction,
    height: Option<u32>,
}

/// Electrum server backed by a map of transactions.
pub struct MockElectrum {
    tip: AtomicU32,
    txs: Mutex<HashMap<Txid, ChainTx>>,
    broadcasts: Mutex<Vec<Transaction>>,
    reject: Mutex<Option<String>>,
    offline: AtomicBool,
    nonce: AtomicU32,
    gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
}

impl Default for MockElectrum {
    fn default() -> Self {
        Self {
            tip: AtomicU32::new(100),
            txs: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            reject: Mutex::new(None),
            offline: AtomicBool::new(false),
            nonce: AtomicU32::new(0),
            gate: Mutex::new(None),
        }
    }
}

impl MockElectrum {
    /// Pay `value` to `script` from a foreign input. Returns the funding txid.
    pub fn fund(&self, script: &Script, value: u64, height: Option<u32>) -> Txid {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([(n % 250) as u8 + 1; 32]), n),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: script.to_owned() }],
        };
        let txid = tx.compute_txid();
        self.txs.lock().unwrap().insert(txid, ChainTx { tx, height });
        txid
    }

    pub fn insert(&self, tx: Transaction, height: Option<u32>) -> Txid {
        let txid = tx.compute_txid();
        self.txs.lock().unwrap().insert(txid, ChainTx { tx, height });
        txid
    }

    pub fn confirm(&self, txid: &Txid, height: u32) {
        if let Some(entry) = self.txs.lock().unwrap().get_mut(txid) {
            entry.height = Some(height);
        }
    }

    pub fn forget(&self, txid: &Txid) { self.txs.lock().unwrap().remove(txid); }

    pub fn set_tip(&self, height: u32) { self.tip.store(height, Ordering::SeqCst) }

    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst) }

    pub fn reject_broadcasts(&self, reason: &str) { *self.reject.lock().unwrap() = Some(reason.to_string()) }

    pub fn broadcasts(&self) -> Vec<Transaction> { self.broadcasts.lock().unwrap().clone() }

    /// Make the next `tip_height` call signal `entered` and wait for `release`.
    pub fn hold_next_request(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    fn check_online(&self) -> Result<(), ElectrumError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ElectrumError::Connection("connection refused".into()));
        }
        Ok(())
    }
}

impl ElectrumBackend for MockElectrum {
    fn tip_height(&self) -> Result<u32, ElectrumError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        self.check_online()?;
        Ok(self.tip.load(Ordering::SeqCst))
    }

    fn block_timestamp(&self, height: u32) -> Result<u64, ElectrumError> {
        self.check_online()?;
        Ok(1_600_000_000 + height as u64 * 600)
    }

    fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>, ElectrumError> {
        self.check_online()?;
        let txs = self.txs.lock().unwrap();
        let pays = |tx: &Transaction| tx.output.iter().any(|o| o.script_pubkey.as_script() == script);
        let spends = |tx: &Transaction| {
            tx.input.iter().any(|i| {
                txs.get(&i.previous_output.txid)
                    .and_then(|prev| prev.tx.output.get(i.previous_output.vout as usize))
                    .map_or(false, |o| o.script_pubkey.as_script() == script)
            })
        };
        Ok(txs
            .iter()
            .filter(|(_, entry)| pays(&entry.tx) || spends(&entry.tx))
            .map(|(txid, entry)| HistoryEntry { txid: *txid, height: entry.height.map_or(0, |h| h as i32) })
            .collect())
    }

    fn transaction(&self, txid: &Txid) -> Result<Transaction, ElectrumError> {
        self.check_online()?;
        self.txs
            .lock()
            .unwrap()
            .get(txid)
            .map(|entry| entry.tx.clone())
            .ok_or_else(|| ElectrumError::Rejected(format!("unknown transaction {txid}")))
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ElectrumError> {
        self.check_online()?;
        if let Some(reason) = self.reject.lock().unwrap().clone() {
            return Err(ElectrumError::Rejected(reason));
        }
        let txid = tx.compute_txid();
        let mut txs = self.txs.lock().unwrap();
        // Drop whatever the new transaction double-spends.
        let spent: Vec<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        txs.retain(|_, entry| entry.height.is_some() || !entry.tx.input.iter().any(|i| spent.contains(&i.previous_output)));
        txs.insert(txid, ChainTx { tx: tx.clone(), height: None });
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(txid)
    }

    fn estimate_fee(&self, _target_blocks: usize) -> Result<f32, ElectrumError> {
        self.check_online()?;
        Ok(2.0)
    }
}

/// Hands out the shared mock and records every URL it was asked for.
pub struct MockConnector {
    pub backend: Arc<MockElectrum>,
    pub urls: Mutex<Vec<String>>,
    pub refuse: AtomicBool,
}

impl MockConnector {
    pub fn new(backend: Arc<MockElectrum>) -> Self {
        Self { backend, urls: Mutex::new(Vec::new()), refuse: AtomicBool::new(false) }
    }

    pub fn urls(&self) -> Vec<String> { self.urls.lock().unwrap().clone() }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn ElectrumBackend>, ElectrumError> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ElectrumError::Connection(format!("cannot reach {url}")));
        }
        Ok(self.backend.clone() as Arc<dyn ElectrumBackend>)
    }
}

pub struct Harness {
    pub server: Arc<MockElectrum>,
    pub connector: Arc<MockConnector>,
    pub client: ElectrumClient,
}

pub fn harness(network: Network) -> Harness {
    let server = Arc::new(MockElectrum::default());
    let connector = Arc::new(MockConnector::new(server.clone()));
    let client = ElectrumClient::with_connector(network, connector.clone());
    Harness { server, connector, client }
}
