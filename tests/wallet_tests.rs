//! Wallet core against the mock Electrum server: derivation, persistence,
//! sync, balance and endpoint handling.

mod common;

use common::{harness, key, no_progress, open_wallet};
use satchel::keys::{self, KeyMaterial};
use satchel::{ErrorKind, Keychain, Network, SyncProgress, TransactionDetails, Wallet};
use std::sync::Mutex;
use tempfile::TempDir;

#[test]
fn bip84_addresses_match_reference_vectors() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("main.json"), Network::Bitcoin);

    let first = wallet.new_address().expect("address 0");
    let second = wallet.new_address().expect("address 1");
    assert_eq!(first.index, 0);
    assert_eq!(first.address.to_string(), "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    assert_eq!(second.address.to_string(), "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");

    let change = wallet.peek_address(Keychain::Internal, 0).expect("change 0");
    assert_eq!(change.address.to_string(), "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el");

    let testnet = open_wallet(&dir.path().join("test.json"), Network::Testnet);
    assert_eq!(
        testnet.last_unused_address().expect("address").address.to_string(),
        "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl"
    );
}

#[test]
fn revealed_indices_survive_reopen() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("wallet.json");
    {
        let wallet = open_wallet(&path, Network::Regtest);
        for expected in 0..3 {
            assert_eq!(wallet.new_address().expect("reveal").index, expected);
        }
    }
    let wallet = open_wallet(&path, Network::Regtest);
    assert_eq!(wallet.new_address().expect("reveal").index, 3);
}

#[test]
fn last_unused_address_does_not_reveal() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);

    let peeked = wallet.last_unused_address().expect("peek");
    assert_eq!(peeked.index, 0);
    assert_eq!(wallet.last_unused_address().expect("peek again"), peeked);

    let revealed = wallet.new_address().expect("reveal");
    assert_eq!(revealed, peeked);
    // Index 0 is revealed but unused, so it is still the one to hand out.
    assert_eq!(wallet.last_unused_address().expect("peek").index, 0);
}

#[test]
fn reopening_with_other_descriptors_conflicts() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("wallet.json");
    drop(open_wallet(&path, Network::Regtest));

    let other = KeyMaterial::restore_with_passphrase(Network::Regtest, common::TEST_MNEMONIC, "other").expect("key");
    let err = Wallet::initialize(
        &keys::receive_descriptor(&other),
        &keys::change_descriptor(&other),
        Network::Regtest,
        &path,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
}

#[test]
fn descriptor_pair_must_be_receive_then_change() {
    let dir = TempDir::new().expect("tempdir");
    let k = key(Network::Regtest);
    let receive = keys::receive_descriptor(&k);
    let err = Wallet::initialize(&receive, &receive, Network::Regtest, dir.path().join("w.json")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);

    let err = Wallet::initialize("wpkh(nonsense)", &keys::change_descriptor(&k), Network::Regtest, dir.path().join("w.json"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
}

#[test]
fn sync_builds_balance_and_history() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Regtest);

    let addr0 = wallet.peek_address(Keychain::External, 0).expect("addr").address.script_pubkey();
    let addr1 = wallet.peek_address(Keychain::External, 1).expect("addr").address.script_pubkey();
    let confirmed = h.server.fund(&addr0, 50_000, Some(90));
    let pending = h.server.fund(&addr1, 20_000, None);
    h.server.set_tip(95);

    let summary = wallet.sync(&h.client, &no_progress).expect("sync");
    assert_eq!(summary.tip_height, 95);
    assert_eq!(summary.transactions, 2);
    assert_eq!(summary.new_transactions, 2);
    assert_eq!(wallet.tip_height(), Some(95));

    let balance = wallet.balance();
    assert_eq!(balance.confirmed, 50_000);
    assert_eq!(balance.unconfirmed, 20_000);
    assert_eq!(balance.total(), 70_000);

    let txs = wallet.list_transactions();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].txid(), pending);
    assert!(!txs[0].is_confirmed());
    assert_eq!(
        txs[1],
        TransactionDetails::Confirmed {
            txid: confirmed,
            height: 90,
            timestamp: 1_600_000_000 + 90 * 600,
            sent: 0,
            received: 50_000,
            fee: None,
        }
    );
    assert_eq!(wallet.list_unspent().len(), 2);

    // Both revealed by use, so the next unused one is index 2.
    assert_eq!(wallet.last_unused_address().expect("addr").index, 2);
}

#[test]
fn sync_discovers_funds_past_the_gap() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = Wallet::initialize_with_lookahead(
        &keys::receive_descriptor(&key(Network::Regtest)),
        &keys::change_descriptor(&key(Network::Regtest)),
        Network::Regtest,
        dir.path().join("wallet.json"),
        5,
    )
    .expect("wallet");
    let h = harness(Network::Regtest);

    // 4 is inside the first window; 8 only becomes visible after 4 is found.
    for index in [4, 8] {
        let script = wallet.peek_address(Keychain::External, index).expect("addr").address.script_pubkey();
        h.server.fund(&script, 10_000, Some(50));
    }
    let far = wallet.peek_address(Keychain::External, 20).expect("addr").address.script_pubkey();
    h.server.fund(&far, 10_000, Some(50));

    wallet.sync(&h.client, &no_progress).expect("sync");
    assert_eq!(wallet.balance().confirmed, 20_000);
    assert_eq!(wallet.new_address().expect("reveal").index, 9);
}

#[test]
fn failed_sync_leaves_state_untouched() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("wallet.json");
    let wallet = open_wallet(&path, Network::Regtest);
    let h = harness(Network::Regtest);

    let script = wallet.peek_address(Keychain::External, 0).expect("addr").address.script_pubkey();
    h.server.fund(&script, 30_000, Some(10));
    wallet.sync(&h.client, &no_progress).expect("first sync");
    let before_disk = std::fs::read(&path).expect("read db");
    let before_txs = wallet.list_transactions();

    h.server.fund(&script, 5_000, Some(11));
    h.server.set_offline(true);
    let err = wallet.sync(&h.client, &no_progress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);

    assert_eq!(wallet.balance().confirmed, 30_000);
    assert_eq!(wallet.list_transactions(), before_txs);
    assert_eq!(std::fs::read(&path).expect("read db"), before_disk);

    h.server.set_offline(false);
    wallet.sync(&h.client, &no_progress).expect("recovered sync");
    assert_eq!(wallet.balance().confirmed, 35_000);
}

#[test]
fn second_sync_on_same_wallet_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Regtest);
    let (entered, release) = h.server.hold_next_request();

    std::thread::scope(|s| {
        let first = s.spawn(|| wallet.sync(&h.client, &no_progress));
        entered.recv().expect("first sync reached the server");

        let err = wallet.sync(&h.client, &no_progress).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SyncInProgress);

        release.send(()).expect("release");
        first.join().expect("join").expect("first sync");
    });

    wallet.sync(&h.client, &no_progress).expect("sync after the first finished");
}

#[test]
fn progress_climbs_to_completion() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Regtest);
    let script = wallet.peek_address(Keychain::External, 0).expect("addr").address.script_pubkey();
    h.server.fund(&script, 1_000, None);

    let seen = Mutex::new(Vec::new());
    let record = |p: SyncProgress| seen.lock().unwrap().push(p.percent);
    wallet.sync(&h.client, &record).expect("sync");

    let seen = seen.into_inner().unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.first().copied(), Some(0.0));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[test]
fn switching_endpoint_is_visible_through_last_synced_url() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Regtest);

    wallet.sync(&h.client, &no_progress).expect("default sync");
    assert_eq!(wallet.last_synced_url().as_deref(), Some("tcp://127.0.0.1:60401"));

    h.client.use_custom("tcp://electrum.local:50001");
    assert_ne!(wallet.last_synced_url(), Some(h.client.current_url()));
    let summary = wallet.sync(&h.client, &no_progress).expect("custom sync");
    assert_eq!(summary.url, "tcp://electrum.local:50001");
    assert_eq!(wallet.last_synced_url().as_deref(), Some("tcp://electrum.local:50001"));
    assert_eq!(h.connector.urls(), vec!["tcp://127.0.0.1:60401", "tcp://electrum.local:50001"]);

    h.client.use_default();
    assert!(h.client.is_default());
}

#[test]
fn unreachable_server_is_a_network_error() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Regtest);
    h.connector.refuse.store(true, std::sync::atomic::Ordering::SeqCst);

    let err = wallet.sync(&h.client, &no_progress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(wallet.last_synced_url(), None);
}

#[test]
fn client_for_another_network_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let wallet = open_wallet(&dir.path().join("wallet.json"), Network::Regtest);
    let h = harness(Network::Signet);
    assert_eq!(wallet.sync(&h.client, &no_progress).unwrap_err().kind(), ErrorKind::Network);
}
