//! WalletService - async adapter over a [`WalletContext`].
//!
//! Wallet calls block on the network and on disk, so each one runs on tokio's
//! blocking pool. Sync progress comes back as a stream of [`SyncEvent`]s.

use crate::context::WalletContext;
use crate::error::{Result, WalletError};
use crate::wallet::{Balance, Recipient, SyncProgress, SyncSummary};
use bitcoin::Txid;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Progress(SyncProgress),
    /// Always the last event of a sync.
    Finished(Result<SyncSummary>),
}

#[derive(Clone)]
pub struct WalletService {
    context: Arc<WalletContext>,
}

impl WalletService {
    pub fn new(context: Arc<WalletContext>) -> Self { Self { context } }

    pub fn context(&self) -> &Arc<WalletContext> { &self.context }

    /// Start a sync. Dropping the receiver stops delivery, not the sync.
    pub fn sync(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let context = self.context.clone();
        tokio::task::spawn_blocking(move || {
            let progress_tx = tx.clone();
            let progress = move |p: SyncProgress| {
                let _ = progress_tx.send(SyncEvent::Progress(p));
            };
            let result = context.sync(&progress);
            if let Err(e) = &result {
                tracing::warn!(error = %e, "background sync failed");
            }
            let _ = tx.send(SyncEvent::Finished(result));
        });
        rx
    }

    /// Run a sync to completion and return its result.
    pub async fn sync_and_wait(&self) -> Result<SyncSummary> {
        let mut events = self.sync();
        while let Some(event) = events.recv().await {
            if let SyncEvent::Finished(result) = event {
                return result;
            }
        }
        Err(WalletError::Network("sync task ended without a result".into()))
    }

    pub async fn balance(&self) -> Result<Balance> {
        let context = self.context.clone();
        blocking(move || context.balance()).await
    }

    pub async fn send(&self, recipients: Vec<Recipient>, fee_rate: f32, rbf: bool) -> Result<Txid> {
        let context = self.context.clone();
        blocking(move || context.send(&recipients, fee_rate, rbf)).await
    }

    pub async fn bump_fee(&self, txid: Txid, fee_rate: f32) -> Result<Txid> {
        let context = self.context.clone();
        blocking(move || context.bump_fee(txid, fee_rate)).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WalletError::Storage(format!("blocking task failed: {e}")))?
}
