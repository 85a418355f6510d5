//! WalletContext - the handle an application holds.
//!
//! Created once with a config and a [`WalletStore`]; a wallet is attached by
//! `create_wallet`, `recover_wallet` or `load_wallet`. Until then every wallet
//! query fails with `NotInitialized`.

use crate::config::WalletConfig;
use crate::electrum::{Connector, ElectrumClient};
use crate::error::{Result, WalletError};
use crate::keys::{self, ExtendedKey, KeyMaterial, WordCount};
use crate::store::WalletStore;
use crate::wallet::{
    AddressInfo, Balance, BumpFeeTxBuilder, ProgressSink, Recipient, SyncSummary, TransactionDetails, TxBuilder,
    TxStatus, Wallet,
};
use bitcoin::{Psbt, Txid};
use std::sync::{Arc, PoisonError, RwLock};

pub struct WalletContext {
    config: WalletConfig,
    store: Arc<dyn WalletStore>,
    electrum: ElectrumClient,
    wallet: RwLock<Option<Arc<Wallet>>>,
}

impl WalletContext {
    #[cfg(feature = "electrum")]
    pub fn new(config: WalletConfig, store: Arc<dyn WalletStore>) -> Self {
        let connector = crate::electrum::TcpConnector { retry: config.electrum_retry, timeout_secs: config.electrum_timeout };
        Self::with_connector(config, store, Arc::new(connector))
    }

    pub fn with_connector(config: WalletConfig, store: Arc<dyn WalletStore>, connector: Arc<dyn Connector>) -> Self {
        let electrum = ElectrumClient::with_connector(config.network, connector);
        if let Some(url) = &config.electrum_url {
            electrum.use_custom(url.clone());
        }
        Self { config, store, electrum, wallet: RwLock::new(None) }
    }

    pub fn config(&self) -> &WalletConfig { &self.config }

    pub fn electrum(&self) -> &ElectrumClient { &self.electrum }

    pub fn is_initialized(&self) -> bool { self.slot().is_some() }

    /// Loaded wallet, or `NotInitialized`.
    pub fn wallet(&self) -> Result<Arc<Wallet>> { self.slot().ok_or(WalletError::NotInitialized) }

    /// Fresh 12-word wallet.
    pub fn create_wallet(&self) -> Result<()> { self.create_wallet_with(WordCount::default()) }

    pub fn create_wallet_with(&self, word_count: WordCount) -> Result<()> {
        let key = KeyMaterial::generate(self.config.network, word_count)?;
        self.attach(&key)?;
        tracing::info!(network = %self.config.network, words = word_count.words(), "wallet created");
        Ok(())
    }

    pub fn recover_wallet(&self, words: &str) -> Result<()> {
        let key = KeyMaterial::restore(self.config.network, words)?;
        self.attach(&key)?;
        tracing::info!(network = %self.config.network, "wallet recovered");
        Ok(())
    }

    /// Reopen the wallet the store remembers.
    pub fn load_wallet(&self) -> Result<()> {
        let data = self.store.initial_wallet_data()?.ok_or(WalletError::NotInitialized)?;
        let wallet = Wallet::initialize_with_lookahead(
            &data.descriptor,
            &data.change_descriptor,
            self.config.network,
            &data.path,
            self.config.lookahead,
        )?;
        self.set(wallet);
        tracing::info!(path = %data.path.display(), "wallet loaded");
        Ok(())
    }

    pub fn mnemonic(&self) -> Result<String> { self.store.mnemonic()?.ok_or(WalletError::NotInitialized) }

    pub fn sync(&self, progress: &dyn ProgressSink) -> Result<SyncSummary> {
        self.wallet()?.sync(&self.electrum, progress)
    }

    pub fn balance(&self) -> Result<Balance> { Ok(self.wallet()?.balance()) }

    pub fn new_address(&self) -> Result<AddressInfo> { self.wallet()?.new_address() }

    pub fn last_unused_address(&self) -> Result<AddressInfo> { self.wallet()?.last_unused_address() }

    pub fn transactions(&self) -> Result<Vec<TransactionDetails>> { Ok(self.wallet()?.list_transactions()) }

    pub fn transaction(&self, txid: &Txid) -> Result<Option<TransactionDetails>> {
        Ok(self.wallet()?.get_transaction(txid))
    }

    pub fn tx_status(&self, txid: &Txid) -> Result<Option<TxStatus>> { Ok(self.wallet()?.tx_status(txid)) }

    /// Build, sign and broadcast a payment.
    pub fn send(&self, recipients: &[Recipient], fee_rate: f32, rbf: bool) -> Result<Txid> {
        let wallet = self.wallet()?;
        let mut builder = TxBuilder::new();
        for recipient in recipients {
            builder.add_recipient(recipient.address.clone(), recipient.amount);
        }
        builder.fee_rate(fee_rate);
        if rbf {
            builder.enable_rbf();
        }
        let psbt = builder.finish(&wallet)?;
        self.sign_and_broadcast(&wallet, psbt)
    }

    /// Sweep every output to `address`.
    pub fn drain(&self, address: &str, fee_rate: f32) -> Result<Txid> {
        let wallet = self.wallet()?;
        let psbt = TxBuilder::new().drain_wallet().drain_to(address).fee_rate(fee_rate).finish(&wallet)?;
        self.sign_and_broadcast(&wallet, psbt)
    }

    pub fn bump_fee(&self, txid: Txid, fee_rate: f32) -> Result<Txid> {
        let wallet = self.wallet()?;
        let psbt = BumpFeeTxBuilder::new(txid, fee_rate).finish(&wallet)?;
        self.sign_and_broadcast(&wallet, psbt)
    }

    fn sign_and_broadcast(&self, wallet: &Wallet, mut psbt: Psbt) -> Result<Txid> {
        let signer = wallet
            .signer()
            .ok_or_else(|| WalletError::Signature("wallet has no signing key".into()))?;
        let signed = signer.sign(&mut psbt)?;
        let txid = self.electrum.broadcast(&signed.tx)?;
        wallet.record_broadcast(&signed.tx)?;
        Ok(txid)
    }

    fn attach(&self, key: &ExtendedKey) -> Result<()> {
        let descriptor = keys::receive_descriptor(key);
        let change_descriptor = keys::change_descriptor(key);
        let path = self.config.db_path();
        let fresh = !path.exists();
        let previous = self.store.initial_wallet_data()?;
        let wallet = Wallet::initialize_with_lookahead(
            &descriptor,
            &change_descriptor,
            self.config.network,
            &path,
            self.config.lookahead,
        )?;

        if let Err(err) = self.store.save_wallet(&path, &descriptor, &change_descriptor) {
            drop(wallet);
            self.discard_database(&path, fresh);
            return Err(err);
        }
        if let Err(err) = self.store.save_mnemonic(&key.mnemonic().to_string()) {
            drop(wallet);
            if let Some(data) = previous {
                if let Err(e) = self.store.save_wallet(&data.path, &data.descriptor, &data.change_descriptor) {
                    tracing::warn!(error = %e, "could not restore previous wallet entry");
                }
            }
            self.discard_database(&path, fresh);
            return Err(err);
        }
        self.set(wallet);
        Ok(())
    }

    /// A database created for a key whose secrets were never stored would
    /// block every later create or recover in this data dir.
    fn discard_database(&self, path: &std::path::Path, fresh: bool) {
        if !fresh {
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed unbound wallet database"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove unbound wallet database"),
        }
    }

    fn set(&self, wallet: Wallet) {
        *self.wallet.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(wallet));
    }

    fn slot(&self) -> Option<Arc<Wallet>> {
        self.wallet.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
