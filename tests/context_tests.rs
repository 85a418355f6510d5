//! WalletContext lifecycle: create, recover, reload and spend through the
//! handle an application holds.

mod common;

use common::{foreign_address, MockConnector, MockElectrum, TEST_MNEMONIC};
use satchel::store::InitialWalletData;
use satchel::{
    ErrorKind, FileStore, MemoryStore, Network, Recipient, SyncProgress, TxStatus, WalletConfig, WalletContext,
    WalletError, WalletStore, WordCount,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Setup {
    _dir: TempDir,
    config: WalletConfig,
    store: Arc<dyn WalletStore>,
    server: Arc<MockElectrum>,
    connector: Arc<MockConnector>,
}

impl Setup {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = WalletConfig::regtest().with_data_dir(dir.path());
        let server = Arc::new(MockElectrum::default());
        let connector = Arc::new(MockConnector::new(server.clone()));
        Self { _dir: dir, config, store: Arc::new(MemoryStore::new()), server, connector }
    }

    fn context(&self) -> WalletContext {
        WalletContext::with_connector(self.config.clone(), self.store.clone(), self.connector.clone())
    }
}

fn quiet(_: SyncProgress) {}

#[test]
fn queries_fail_until_a_wallet_is_attached() {
    let setup = Setup::new();
    let context = setup.context();
    assert!(!context.is_initialized());
    assert_eq!(context.balance().unwrap_err().kind(), ErrorKind::NotInitialized);
    assert_eq!(context.new_address().unwrap_err().kind(), ErrorKind::NotInitialized);
    assert_eq!(context.sync(&quiet).unwrap_err().kind(), ErrorKind::NotInitialized);
    assert_eq!(context.load_wallet().unwrap_err().kind(), ErrorKind::NotInitialized);
    assert_eq!(context.mnemonic().unwrap_err().kind(), ErrorKind::NotInitialized);
}

#[test]
fn recover_then_reload_from_the_store() {
    let setup = Setup::new();
    let first = setup.context();
    first.recover_wallet(TEST_MNEMONIC).expect("recover");
    assert!(first.is_initialized());
    assert_eq!(first.mnemonic().expect("mnemonic"), TEST_MNEMONIC);
    let issued = first.new_address().expect("address");
    assert_eq!(issued.index, 0);

    let data = setup.store.initial_wallet_data().expect("read").expect("saved");
    assert_eq!(data.path, setup.config.db_path());
    assert!(data.descriptor.contains("/0/*"));
    assert!(data.change_descriptor.contains("/1/*"));
    drop(first);

    let second = setup.context();
    second.load_wallet().expect("load");
    assert_eq!(second.new_address().expect("address").index, 1);
}

#[test]
fn created_wallet_has_a_fresh_mnemonic() {
    let setup = Setup::new();
    let context = setup.context();
    context.create_wallet_with(WordCount::Words24).expect("create");
    let words = context.mnemonic().expect("mnemonic");
    assert_eq!(words.split_whitespace().count(), 24);
    assert_ne!(words, TEST_MNEMONIC);
}

#[test]
fn bad_mnemonic_leaves_the_context_empty() {
    let setup = Setup::new();
    let context = setup.context();
    let err = context.recover_wallet("abandon abandon abandon").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMnemonic);
    assert!(!context.is_initialized());
    assert!(setup.store.initial_wallet_data().expect("read").is_none());
}

#[test]
fn configured_electrum_url_is_used() {
    let mut setup = Setup::new();
    setup.config = setup.config.clone().with_electrum("tcp://node.lan:50001");
    let context = setup.context();
    assert!(!context.electrum().is_default());
    context.recover_wallet(TEST_MNEMONIC).expect("recover");
    let summary = context.sync(&quiet).expect("sync");
    assert_eq!(summary.url, "tcp://node.lan:50001");
    assert_eq!(setup.connector.urls(), vec!["tcp://node.lan:50001"]);
}

#[test]
fn send_and_bump_through_the_context() {
    let setup = Setup::new();
    let context = setup.context();
    context.recover_wallet(TEST_MNEMONIC).expect("recover");

    let script = context.last_unused_address().expect("address").address.script_pubkey();
    setup.server.fund(&script, 80_000, Some(50));
    context.sync(&quiet).expect("sync");
    assert_eq!(context.balance().expect("balance").confirmed, 80_000);

    let to = foreign_address(Network::Regtest, 0);
    let txid = context.send(&[Recipient::new(to, 25_000)], 1.0, true).expect("send");
    assert_eq!(setup.server.broadcasts().len(), 1);
    assert_eq!(context.tx_status(&txid).expect("status"), Some(TxStatus::Unconfirmed));
    let details = context.transaction(&txid).expect("lookup").expect("known");
    assert_eq!(details.sent(), 80_000);

    let bumped = context.bump_fee(txid, 4.0).expect("bump");
    assert_eq!(context.tx_status(&txid).expect("status"), Some(TxStatus::Replaced { by: bumped }));
    assert_eq!(setup.server.broadcasts().len(), 2);

    let swept = context.drain(&foreign_address(Network::Regtest, 1), 2.0).expect("drain");
    assert_eq!(context.balance().expect("balance").total(), 0);
    assert!(context.transactions().expect("list").iter().any(|tx| tx.txid() == swept));
}

#[test]
fn file_store_survives_a_restart() {
    let dir = TempDir::new().expect("tempdir");
    let config = WalletConfig::regtest().with_data_dir(dir.path());
    let server = Arc::new(MockElectrum::default());
    let connector = Arc::new(MockConnector::new(server));

    let address = {
        let context =
            WalletContext::with_connector(config.clone(), Arc::new(FileStore::new(config.store_path())), connector.clone());
        context.recover_wallet(TEST_MNEMONIC).expect("recover");
        context.new_address().expect("address")
    };

    let context = WalletContext::with_connector(config.clone(), Arc::new(FileStore::new(config.store_path())), connector);
    context.load_wallet().expect("load");
    assert_eq!(context.mnemonic().expect("mnemonic"), TEST_MNEMONIC);
    assert_eq!(context.new_address().expect("address").index, address.index + 1);
}

/// Reads work, the chosen writes fail.
#[derive(Default)]
struct FailingStore {
    inner: MemoryStore,
    fail_wallet: bool,
    fail_mnemonic: bool,
}

impl WalletStore for FailingStore {
    fn save_wallet(&self, path: &Path, descriptor: &str, change_descriptor: &str) -> satchel::Result<()> {
        if self.fail_wallet {
            return Err(WalletError::Storage("keychain locked".into()));
        }
        self.inner.save_wallet(path, descriptor, change_descriptor)
    }

    fn save_mnemonic(&self, words: &str) -> satchel::Result<()> {
        if self.fail_mnemonic {
            return Err(WalletError::Storage("keychain locked".into()));
        }
        self.inner.save_mnemonic(words)
    }

    fn initial_wallet_data(&self) -> satchel::Result<Option<InitialWalletData>> { self.inner.initial_wallet_data() }

    fn mnemonic(&self) -> satchel::Result<Option<String>> { self.inner.mnemonic() }
}

#[test]
fn failed_secret_save_leaves_no_database_behind() {
    for store in [
        FailingStore { fail_wallet: true, ..Default::default() },
        FailingStore { fail_mnemonic: true, ..Default::default() },
    ] {
        let setup = Setup::new();
        let broken = WalletContext::with_connector(setup.config.clone(), Arc::new(store), setup.connector.clone());
        assert_eq!(broken.create_wallet().unwrap_err().kind(), ErrorKind::Storage);
        assert!(!broken.is_initialized());
        assert!(!setup.config.db_path().exists());

        // A different key in the same data dir must still be accepted.
        let context = setup.context();
        context.recover_wallet(TEST_MNEMONIC).expect("recover after failed create");
        assert!(setup.config.db_path().exists());
    }
}

#[test]
fn failed_secret_save_keeps_an_existing_database() {
    let setup = Setup::new();
    setup.context().recover_wallet(TEST_MNEMONIC).expect("recover");
    let before = std::fs::read(setup.config.db_path()).expect("read db");

    let store = FailingStore { fail_mnemonic: true, ..Default::default() };
    let broken = WalletContext::with_connector(setup.config.clone(), Arc::new(store), setup.connector.clone());
    assert_eq!(broken.recover_wallet(TEST_MNEMONIC).unwrap_err().kind(), ErrorKind::Storage);
    assert_eq!(std::fs::read(setup.config.db_path()).expect("read db"), before);
}
