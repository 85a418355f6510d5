//! Electrum - endpoint selection, connection and broadcast.
//!
//! # Architecture
//!
//! ```text
//! ElectrumClient (one active endpoint)
//!     │
//!     ├── Connector ──connect(url)──► ElectrumBackend
//!     │                                 ├── tip_height / block_timestamp
//!     │                                 ├── script_history / transaction
//!     │                                 └── broadcast / estimate_fee
//!     │
//!     └── header cache (cleared on endpoint switch)
//! ```
//!
//! Retry with backoff lives in the transport (`electrum-client` config);
//! callers only ever see success or failure.

#[cfg(feature = "electrum")]
mod tcp;

#[cfg(feature = "electrum")]
pub use tcp::TcpConnector;

use crate::error::{Result, WalletError};
use crate::network::Network;
use bitcoin::{Script, Transaction, Txid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElectrumError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<ElectrumError> for WalletError {
    fn from(err: ElectrumError) -> Self {
        match err {
            ElectrumError::Connection(msg) => WalletError::Network(msg),
            ElectrumError::Rejected(msg) => WalletError::Rejected(msg),
        }
    }
}

/// One entry of `blockchain.scripthash.get_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub txid: Txid,
    /// Confirmation height; zero or negative while in the mempool.
    pub height: i32,
}

impl HistoryEntry {
    pub fn confirmed_height(&self) -> Option<u32> {
        (self.height > 0).then_some(self.height as u32)
    }
}

/// Requests the wallet needs from an Electrum server.
pub trait ElectrumBackend: Send + Sync {
    fn tip_height(&self) -> Result<u32, ElectrumError>;
    fn block_timestamp(&self, height: u32) -> Result<u64, ElectrumError>;
    fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>, ElectrumError>;
    fn transaction(&self, txid: &Txid) -> Result<Transaction, ElectrumError>;
    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ElectrumError>;
    /// Fee estimate in sat/vB for confirmation within `target_blocks`.
    fn estimate_fee(&self, target_blocks: usize) -> Result<f32, ElectrumError>;
}

/// Opens a backend for a URL.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn ElectrumBackend>, ElectrumError>;
}

/// Active endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ElectrumEndpoint {
    #[default]
    Default,
    Custom(String),
}

struct ClientState {
    endpoint: ElectrumEndpoint,
    connection: Option<Arc<dyn ElectrumBackend>>,
    header_times: HashMap<u32, u64>,
    epoch: u64,
}

/// Electrum client holding exactly one active endpoint.
pub struct ElectrumClient {
    network: Network,
    connector: Arc<dyn Connector>,
    state: Mutex<ClientState>,
}

/// Connection pinned to the endpoint that was active when it was taken.
#[derive(Clone)]
pub(crate) struct Session {
    pub backend: Arc<dyn ElectrumBackend>,
    pub url: String,
    epoch: u64,
}

impl ElectrumClient {
    /// Client using the TCP/SSL transport with default retry settings.
    #[cfg(feature = "electrum")]
    pub fn new(network: Network) -> Self {
        Self::with_connector(network, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(network: Network, connector: Arc<dyn Connector>) -> Self {
        Self {
            network,
            connector,
            state: Mutex::new(ClientState {
                endpoint: ElectrumEndpoint::Default,
                connection: None,
                header_times: HashMap::new(),
                epoch: 0,
            }),
        }
    }

    pub fn network(&self) -> Network { self.network }

    pub fn use_default(&self) { self.switch(ElectrumEndpoint::Default) }

    pub fn use_custom(&self, url: impl Into<String>) { self.switch(ElectrumEndpoint::Custom(url.into())) }

    pub fn endpoint(&self) -> ElectrumEndpoint { self.lock().endpoint.clone() }

    pub fn current_url(&self) -> String {
        let state = self.lock();
        self.url_for(&state.endpoint)
    }

    pub fn is_default(&self) -> bool { self.lock().endpoint == ElectrumEndpoint::Default }

    pub fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        let session = self.session()?;
        let txid = tx.compute_txid();
        match session.backend.broadcast(tx) {
            Ok(_) => {
                tracing::info!(%txid, url = %session.url, "broadcast transaction");
                Ok(txid)
            }
            Err(e) => {
                tracing::warn!(%txid, url = %session.url, error = %e, "broadcast failed");
                if matches!(e, ElectrumError::Connection(_)) {
                    self.drop_connection(&session);
                }
                Err(e.into())
            }
        }
    }

    pub fn estimate_fee_rate(&self, target_blocks: usize) -> Result<f32> {
        let session = self.session()?;
        session.backend.estimate_fee(target_blocks).map_err(|e| {
            self.drop_connection(&session);
            e.into()
        })
    }

    /// Live connection for the active endpoint, connecting on first use.
    pub(crate) fn session(&self) -> Result<Session> {
        let (url, epoch) = {
            let state = self.lock();
            if let Some(backend) = &state.connection {
                return Ok(Session { backend: backend.clone(), url: self.url_for(&state.endpoint), epoch: state.epoch });
            }
            (self.url_for(&state.endpoint), state.epoch)
        };

        // Connect without holding the lock; a switch meanwhile wins.
        let backend = self.connector.connect(&url).map_err(|e| {
            tracing::warn!(%url, error = %e, "electrum connect failed");
            WalletError::from(e)
        })?;
        tracing::info!(%url, "connected to electrum server");

        let mut state = self.lock();
        if state.epoch == epoch {
            state.connection = Some(backend.clone());
        }
        Ok(Session { backend, url, epoch })
    }

    /// Header time, cached per endpoint.
    pub(crate) fn block_timestamp(&self, session: &Session, height: u32) -> Result<u64> {
        if let Some(time) = self.cached_time(session, height) {
            return Ok(time);
        }
        let time = session.backend.block_timestamp(height)?;
        let mut state = self.lock();
        if state.epoch == session.epoch {
            state.header_times.insert(height, time);
        }
        Ok(time)
    }

    pub(crate) fn drop_connection(&self, session: &Session) {
        let mut state = self.lock();
        if state.epoch == session.epoch {
            state.connection = None;
        }
    }

    fn cached_time(&self, session: &Session, height: u32) -> Option<u64> {
        let state = self.lock();
        (state.epoch == session.epoch).then(|| state.header_times.get(&height).copied()).flatten()
    }

    fn switch(&self, endpoint: ElectrumEndpoint) {
        let mut state = self.lock();
        state.endpoint = endpoint;
        state.connection = None;
        state.header_times.clear();
        state.epoch += 1;
        tracing::info!(url = %self.url_for(&state.endpoint), "electrum endpoint switched");
    }

    fn url_for(&self, endpoint: &ElectrumEndpoint) -> String {
        match endpoint {
            ElectrumEndpoint::Default => self.network.default_electrum_url().to_string(),
            ElectrumEndpoint::Custom(url) => url.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
