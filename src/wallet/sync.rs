//! Chain scan against an Electrum session.
//!
//! The scan reads a snapshot and never touches the live state; the caller
//! applies the returned [`SyncUpdate`] in one step.

use super::state::{PerKeychain, StoredTx, SyncUpdate, WalletState};
use super::types::ChainPosition;
use super::KeychainPair;
use crate::electrum::{ElectrumClient, ElectrumError, Session};
use crate::error::{Result, WalletError};
use crate::keys::Keychain;
use bitcoin::Txid;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sync progress in percent with an optional status line.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncProgress {
    pub percent: f32,
    pub message: Option<String>,
}

/// Receives progress while a sync runs. Closures work directly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: SyncProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(SyncProgress) + Send + Sync,
{
    fn on_progress(&self, progress: SyncProgress) { self(progress) }
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub tip_height: u32,
    pub transactions: usize,
    pub new_transactions: usize,
    pub url: String,
}

pub(crate) fn report(sink: &dyn ProgressSink, percent: f32, message: impl Into<String>) {
    sink.on_progress(SyncProgress { percent, message: Some(message.into()) });
}

/// Scan both keychains until `lookahead` consecutive unused scripts follow the
/// last used or revealed index, then fetch every referenced transaction.
pub(crate) fn scan(
    client: &ElectrumClient,
    session: &Session,
    keychains: &KeychainPair,
    snapshot: &WalletState,
    lookahead: u32,
    progress: &dyn ProgressSink,
) -> Result<SyncUpdate> {
    let tip_height = remote(client, session, session.backend.tip_height())?;
    tracing::debug!(tip_height, url = %session.url, "scanning wallet scripts");

    let mut heights: BTreeMap<Txid, Option<u32>> = BTreeMap::new();
    let mut last_used = PerKeychain::<Option<u32>>::default();

    for (n, keychain) in Keychain::ALL.into_iter().enumerate() {
        let base = 30.0 * n as f32;
        report(progress, base, format!("scanning {} addresses", keychain.as_str()));
        let desc = keychains.get(keychain);
        let floor = snapshot.revealed.get(keychain);
        let mut index = 0u32;
        let mut shown = base;
        loop {
            let stop = last_used.get(keychain).map_or(0, |i| i + 1).max(floor).saturating_add(lookahead);
            if index >= stop {
                break;
            }
            let derived = desc.derive(index)?;
            let history = remote(client, session, session.backend.script_history(&derived.script_pubkey))?;
            if !history.is_empty() {
                last_used.set(keychain, Some(index));
            }
            for entry in history {
                let slot = heights.entry(entry.txid).or_insert(None);
                if let Some(h) = entry.confirmed_height() {
                    *slot = Some(h);
                }
            }
            index += 1;
            // The window can grow mid-scan; never move the bar backwards.
            shown = shown.max(base + 30.0 * index as f32 / stop.max(1) as f32);
            report(progress, shown, format!("{} #{}", keychain.as_str(), index));
        }
        tracing::debug!(keychain = keychain.as_str(), scanned = index, last_used = ?last_used.get(keychain), "keychain scanned");
    }

    let total = heights.len().max(1);
    let mut txs = BTreeMap::new();
    for (n, (txid, height)) in heights.into_iter().enumerate() {
        let known = snapshot.txs.get(&txid);
        let tx = match known {
            Some(stored) => stored.tx.clone(),
            None => {
                let tx = remote(client, session, session.backend.transaction(&txid))?;
                if tx.compute_txid() != txid {
                    return Err(WalletError::Network(format!("server returned a different transaction for {txid}")));
                }
                Arc::new(tx)
            }
        };
        let position = match height {
            Some(height) => {
                let timestamp = match known.map(|stored| stored.position) {
                    Some(ChainPosition::Confirmed { height: h, timestamp }) if h == height => timestamp,
                    _ => remote_cached_time(client, session, height)?,
                };
                ChainPosition::Confirmed { height, timestamp }
            }
            None => ChainPosition::Unconfirmed,
        };
        txs.insert(txid, StoredTx { tx, position, local: false });
        report(progress, 60.0 + 35.0 * (n + 1) as f32 / total as f32, format!("fetched {txid}"));
    }

    Ok(SyncUpdate { txs, tip_height, url: session.url.clone(), last_used })
}

fn remote_cached_time(client: &ElectrumClient, session: &Session, height: u32) -> Result<u64> {
    client.block_timestamp(session, height).map_err(|e| {
        if matches!(e, WalletError::Network(_)) {
            client.drop_connection(session);
        }
        e
    })
}

fn remote<T>(client: &ElectrumClient, session: &Session, result: std::result::Result<T, ElectrumError>) -> Result<T> {
    result.map_err(|e| {
        tracing::warn!(url = %session.url, error = %e, "electrum request failed");
        if matches!(e, ElectrumError::Connection(_)) {
            client.drop_connection(session);
        }
        e.into()
    })
}
