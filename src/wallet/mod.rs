//! Wallet - descriptors bound to a local database, synced over Electrum.
//!
//! # Architecture
//!
//! ```text
//! Wallet
//!     │
//!     ├── KeychainPair (external + internal WalletDescriptor)
//!     ├── RwLock<WalletState> ── snapshot() ──► TxBuilder / BumpFeeTxBuilder
//!     │                                                │
//!     │                                                ▼
//!     │                                              Psbt ──► Signer ──► SignedTransaction
//!     ├── sync_lock (one sync at a time)
//!     └── WalletDb (JSON, temp file + rename)
//! ```
//!
//! Every mutation clones the state, applies the change, persists it and only
//! then swaps it in. A failed write leaves memory and disk untouched.

pub mod coin_selection;
mod db;
pub mod signer;
mod state;
pub mod sync;
pub mod tx_builder;
pub mod types;

pub use signer::{finalize, SignedTransaction, Signer};
pub use state::PerKeychain;
pub use sync::{ProgressSink, SyncProgress, SyncSummary};
pub use tx_builder::{BumpFeeTxBuilder, Recipient, TxBuilder};
pub use types::{AddressInfo, Balance, ChainPosition, LocalUtxo, TransactionDetails, TxStatus};

use crate::electrum::ElectrumClient;
use crate::error::{Result, WalletError};
use crate::keys::{Keychain, WalletDescriptor};
use crate::network::Network;
use bitcoin::{Address, Transaction, Txid};
use db::WalletDb;
use state::WalletState;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// Consecutive unused scripts scanned past the last used index.
pub const DEFAULT_LOOKAHEAD: u32 = 20;

/// Receive and change descriptors of one account.
#[derive(Debug, Clone)]
pub(crate) struct KeychainPair {
    external: WalletDescriptor,
    internal: WalletDescriptor,
}

impl KeychainPair {
    pub fn get(&self, keychain: Keychain) -> &WalletDescriptor {
        match keychain {
            Keychain::External => &self.external,
            Keychain::Internal => &self.internal,
        }
    }
}

pub struct Wallet {
    network: Network,
    keychains: KeychainPair,
    db: WalletDb,
    lookahead: u32,
    state: RwLock<WalletState>,
    sync_lock: Mutex<()>,
}

impl Wallet {
    /// Bind the descriptor pair to the database at `storage_path`, creating it
    /// on first use.
    pub fn initialize(
        descriptor: &str,
        change_descriptor: &str,
        network: Network,
        storage_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::initialize_with_lookahead(descriptor, change_descriptor, network, storage_path, DEFAULT_LOOKAHEAD)
    }

    pub fn initialize_with_lookahead(
        descriptor: &str,
        change_descriptor: &str,
        network: Network,
        storage_path: impl AsRef<Path>,
        lookahead: u32,
    ) -> Result<Self> {
        let external = WalletDescriptor::parse(descriptor, network)?;
        let internal = WalletDescriptor::parse(change_descriptor, network)?;
        if external.keychain() != Keychain::External || internal.keychain() != Keychain::Internal {
            return Err(WalletError::InvalidDescriptor(
                "expected a receive (/0/*) and a change (/1/*) descriptor".into(),
            ));
        }
        if external.master_fingerprint() != internal.master_fingerprint()
            || external.account_path() != internal.account_path()
        {
            return Err(WalletError::InvalidDescriptor("descriptors belong to different accounts".into()));
        }

        let (db, mut state) =
            WalletDb::open(storage_path.as_ref(), network, external.public_string(), internal.public_string())?;
        let keychains = KeychainPair { external, internal };
        let lookahead = lookahead.max(1);
        state.ensure_derived(&keychains, lookahead)?;

        tracing::info!(
            %network,
            fingerprint = %keychains.external.master_fingerprint(),
            path = %db.path().display(),
            "wallet initialized"
        );
        Ok(Self {
            network,
            keychains,
            db,
            lookahead,
            state: RwLock::new(state),
            sync_lock: Mutex::new(()),
        })
    }

    pub fn network(&self) -> Network { self.network }
    pub fn lookahead(&self) -> u32 { self.lookahead }
    pub fn storage_path(&self) -> &Path { self.db.path() }
    pub fn descriptor(&self, keychain: Keychain) -> &WalletDescriptor { self.keychains.get(keychain) }

    /// Scan both keychains and replace the local view of the chain. Fails with
    /// `SyncInProgress` when another sync holds this wallet.
    pub fn sync(&self, client: &ElectrumClient, progress: &dyn ProgressSink) -> Result<SyncSummary> {
        let _running = match self.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(WalletError::SyncInProgress),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if client.network() != self.network {
            return Err(WalletError::Network(format!(
                "client is configured for {}, wallet for {}",
                client.network(),
                self.network
            )));
        }

        sync::report(progress, 0.0, "connecting");
        let snapshot = self.snapshot();
        let session = client.session()?;
        let update = sync::scan(client, &session, &self.keychains, &snapshot, self.lookahead, progress)?;

        let summary = SyncSummary {
            tip_height: update.tip_height,
            transactions: update.txs.len(),
            new_transactions: update.txs.keys().filter(|txid| !snapshot.txs.contains_key(*txid)).count(),
            url: update.url.clone(),
        };
        self.update(|state| {
            state.apply_sync(update);
            Ok(())
        })?;

        sync::report(progress, 100.0, "sync complete");
        tracing::info!(
            tip_height = summary.tip_height,
            transactions = summary.transactions,
            new = summary.new_transactions,
            url = %summary.url,
            "wallet synced"
        );
        Ok(summary)
    }

    pub fn balance(&self) -> Balance { self.read().balance() }

    /// Reveal the next receive address. Indices are never handed out twice.
    pub fn new_address(&self) -> Result<AddressInfo> {
        let index = self.update(|state| {
            let index = state.revealed.external;
            state.revealed.external = index
                .checked_add(1)
                .ok_or_else(|| WalletError::InvalidDescriptor("receive keychain exhausted".into()))?;
            Ok(index)
        })?;
        tracing::debug!(index, "revealed receive address");
        self.peek_address(Keychain::External, index)
    }

    /// Newest revealed receive address without observed use, else the next
    /// one (not revealed).
    pub fn last_unused_address(&self) -> Result<AddressInfo> {
        let index = {
            let state = self.read();
            let used = state.used_indices(Keychain::External);
            let revealed = state.revealed.external;
            (0..revealed).rev().find(|i| !used.contains(i)).unwrap_or(revealed)
        };
        self.peek_address(Keychain::External, index)
    }

    pub fn peek_address(&self, keychain: Keychain, index: u32) -> Result<AddressInfo> {
        let derived = self.keychains.get(keychain).derive(index)?;
        Ok(AddressInfo { keychain, index, address: derived.address })
    }

    pub fn list_unspent(&self) -> Vec<LocalUtxo> { self.read().unspent() }

    /// Unconfirmed first, then by confirmation height, newest first.
    pub fn list_transactions(&self) -> Vec<TransactionDetails> { self.read().list() }

    pub fn get_transaction(&self, txid: &Txid) -> Option<TransactionDetails> { self.read().details(txid) }

    pub fn tx_status(&self, txid: &Txid) -> Option<TxStatus> { self.read().status(txid) }

    /// Record a transaction this wallet broadcast. Conflicting unconfirmed
    /// transactions become `Replaced`.
    pub fn record_broadcast(&self, tx: &Transaction) -> Result<()> {
        let txid = tx.compute_txid();
        if !self.read().is_relevant(tx) {
            tracing::debug!(%txid, "broadcast does not touch this wallet, not recorded");
            return Ok(());
        }
        let replaced = self.update(|state| Ok(state.record_local(tx.clone())))?;
        for old in &replaced {
            tracing::info!(%old, by = %txid, "transaction replaced");
        }
        Ok(())
    }

    /// Signer for the master key, when the descriptors carried it.
    pub fn signer(&self) -> Option<Signer> {
        self.keychains.external.signing_key().map(|xprv| Signer::from_xprv(*xprv))
    }

    pub fn tip_height(&self) -> Option<u32> { self.read().tip_height }

    pub fn last_synced_url(&self) -> Option<String> { self.read().last_synced_url.clone() }

    /// Consistent copy of the state for builders.
    pub(crate) fn snapshot(&self) -> WalletState { self.read().clone() }

    pub(crate) fn parse_address(&self, address: &str) -> Result<Address> {
        let invalid = |reason: String| WalletError::InvalidAddress { address: address.to_string(), reason };
        Address::from_str(address.trim())
            .map_err(|e| invalid(e.to_string()))?
            .require_network(self.network.to_bitcoin())
            .map_err(|e| invalid(e.to_string()))
    }

    fn update<T>(&self, mutate: impl FnOnce(&mut WalletState) -> Result<T>) -> Result<T> {
        let mut guard = self.write();
        let mut next = guard.clone();
        let out = mutate(&mut next)?;
        next.ensure_derived(&self.keychains, self.lookahead)?;
        self.db.save(&next)?;
        *guard = next;
        Ok(out)
    }

    fn read(&self) -> RwLockReadGuard<'_, WalletState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WalletState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("network", &self.network)
            .field("path", &self.db.path())
            .field("lookahead", &self.lookahead)
            .finish_non_exhaustive()
    }
}
