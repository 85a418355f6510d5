//! Satchel: non-custodial BIP84 wallet core. Keys, descriptors, Electrum sync,
//! coin selection and PSBT signing.
//!
//! # Architecture
//!
//! ```text
//! WalletContext (handle held by the app)
//!   │
//!   ├── WalletStore (descriptors + mnemonic, outside the wallet db)
//!   │
//!   ├── ElectrumClient (one active endpoint)
//!   │     └── Connector → ElectrumBackend (tcp/ssl via electrum-client)
//!   │
//!   └── Wallet
//!         ├── KeyMaterial → descriptors (wpkh, 84'/coin'/0'/{0,1}/*)
//!         ├── WalletState + WalletDb (JSON, public data only)
//!         ├── TxBuilder / BumpFeeTxBuilder → Psbt
//!         └── Signer → SignedTransaction → broadcast → record_broadcast
//! ```
//!
//! # Features
//!
//! - `electrum` - TCP/SSL transport (bdk_electrum's electrum-client) and the CLI
//! - `async` - tokio adapter with a sync progress stream
//!
//! # Usage
//!
//! ```no_run
//! use satchel::{MemoryStore, Network, WalletConfig, WalletContext};
//! use std::sync::Arc;
//!
//! # fn main() -> satchel::Result<()> {
//! let context = WalletContext::new(WalletConfig::new(Network::Signet), Arc::new(MemoryStore::new()));
//! context.recover_wallet("abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about")?;
//! context.sync(&|p: satchel::SyncProgress| println!("{:.0}%", p.percent))?;
//! println!("{} sat", context.balance()?.total());
//! # Ok(()) }
//! ```

pub mod config;
pub mod context;
pub mod electrum;
pub mod error;
pub mod keys;
pub mod logging;
pub mod network;
#[cfg(feature = "async")]
pub mod service;
pub mod store;
pub mod wallet;

pub use config::WalletConfig;
pub use context::WalletContext;
pub use electrum::{ElectrumClient, ElectrumEndpoint};
pub use error::{ErrorKind, Result, WalletError};
pub use keys::{ExtendedKey, KeyMaterial, Keychain, WordCount};
pub use network::Network;
#[cfg(feature = "async")]
pub use service::{SyncEvent, WalletService};
pub use store::{FileStore, InitialWalletData, MemoryStore, WalletStore};
pub use wallet::{
    AddressInfo, Balance, BumpFeeTxBuilder, LocalUtxo, Recipient, SignedTransaction, Signer, SyncProgress,
    SyncSummary, TransactionDetails, TxBuilder, TxStatus, Wallet,
};
