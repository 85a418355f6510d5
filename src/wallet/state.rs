//! In-memory wallet state: known transactions, derived scripts, indices.
//!
//! Every method here is a pure function of the state. Mutations go through
//! `Wallet::update`, which persists before swapping the new state in.

use super::types::{Balance, ChainPosition, LocalUtxo, TransactionDetails, TxStatus};
use super::KeychainPair;
use crate::error::Result;
use crate::keys::Keychain;
use bitcoin::{OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// One value per keychain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerKeychain<T> {
    pub external: T,
    pub internal: T,
}

impl<T: Copy> PerKeychain<T> {
    pub fn get(&self, keychain: Keychain) -> T {
        match keychain { Keychain::External => self.external, Keychain::Internal => self.internal }
    }

    pub fn set(&mut self, keychain: Keychain, value: T) {
        match keychain { Keychain::External => self.external = value, Keychain::Internal => self.internal = value }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredTx {
    pub tx: Arc<Transaction>,
    pub position: ChainPosition,
    /// Broadcast by this wallet and not yet reported by the server.
    pub local: bool,
}

impl StoredTx {
    pub fn is_confirmed(&self) -> bool { matches!(self.position, ChainPosition::Confirmed { .. }) }
}

/// Script → (keychain, index) for every derived script.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpkIndex {
    scripts: HashMap<ScriptBuf, (Keychain, u32)>,
    derived: PerKeychain<u32>,
}

impl SpkIndex {
    pub fn lookup(&self, script: &Script) -> Option<(Keychain, u32)> { self.scripts.get(script).copied() }
}

/// Result of a chain scan, applied atomically.
#[derive(Debug, Clone)]
pub(crate) struct SyncUpdate {
    pub txs: BTreeMap<Txid, StoredTx>,
    pub tip_height: u32,
    pub url: String,
    pub last_used: PerKeychain<Option<u32>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct WalletState {
    pub txs: BTreeMap<Txid, StoredTx>,
    /// Next index `new_address` hands out, per keychain.
    pub revealed: PerKeychain<u32>,
    pub tip_height: Option<u32>,
    pub last_synced_url: Option<String>,
    pub replaced: BTreeMap<Txid, Txid>,
    pub spks: SpkIndex,
}

impl WalletState {
    /// Derive scripts up to `lookahead` past the highest revealed or used index.
    pub fn ensure_derived(&mut self, keychains: &KeychainPair, lookahead: u32) -> Result<()> {
        let used = self.last_used();
        for keychain in Keychain::ALL {
            let floor = used.get(keychain).map_or(0, |i| i + 1).max(self.revealed.get(keychain));
            let target = floor.saturating_add(lookahead);
            let desc = keychains.get(keychain);
            for index in self.spks.derived.get(keychain)..target {
                let derived = desc.derive(index)?;
                self.spks.scripts.insert(derived.script_pubkey, (keychain, index));
            }
            if target > self.spks.derived.get(keychain) {
                self.spks.derived.set(keychain, target);
            }
        }
        Ok(())
    }

    pub fn is_mine(&self, script: &Script) -> bool { self.spks.lookup(script).is_some() }

    pub fn last_used(&self) -> PerKeychain<Option<u32>> {
        let mut used = PerKeychain::<Option<u32>>::default();
        for stored in self.txs.values() {
            for out in &stored.tx.output {
                if let Some((keychain, index)) = self.spks.lookup(&out.script_pubkey) {
                    if used.get(keychain).map_or(true, |cur| index > cur) {
                        used.set(keychain, Some(index));
                    }
                }
            }
        }
        used
    }

    pub fn used_indices(&self, keychain: Keychain) -> HashSet<u32> {
        self.txs
            .values()
            .flat_map(|stored| stored.tx.output.iter())
            .filter_map(|out| self.spks.lookup(&out.script_pubkey))
            .filter(|(k, _)| *k == keychain)
            .map(|(_, index)| index)
            .collect()
    }

    /// Lowest change index past every used one.
    pub fn next_change_index(&self) -> u32 {
        self.last_used().internal.map_or(0, |i| i + 1)
    }

    fn spent_outpoints(&self) -> HashSet<OutPoint> {
        self.txs
            .values()
            .flat_map(|stored| stored.tx.input.iter().map(|input| input.previous_output))
            .collect()
    }

    pub fn prevout(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.txs.get(&outpoint.txid)?.tx.output.get(outpoint.vout as usize)
    }

    /// Wallet-owned output at `outpoint`, spent or not.
    pub fn owned_output(&self, outpoint: &OutPoint) -> Option<LocalUtxo> {
        let stored = self.txs.get(&outpoint.txid)?;
        let txout = stored.tx.output.get(outpoint.vout as usize)?;
        let (keychain, index) = self.spks.lookup(&txout.script_pubkey)?;
        Some(LocalUtxo {
            outpoint: *outpoint,
            txout: txout.clone(),
            keychain,
            index,
            confirmation_height: match stored.position {
                ChainPosition::Confirmed { height, .. } => Some(height),
                ChainPosition::Unconfirmed => None,
            },
        })
    }

    pub fn unspent(&self) -> Vec<LocalUtxo> {
        let spent = self.spent_outpoints();
        self.txs
            .iter()
            .flat_map(|(txid, stored)| (0..stored.tx.output.len() as u32).map(move |vout| OutPoint::new(*txid, vout)))
            .filter(|outpoint| !spent.contains(outpoint))
            .filter_map(|outpoint| self.owned_output(&outpoint))
            .collect()
    }

    pub fn balance(&self) -> Balance {
        self.unspent().iter().fold(Balance::default(), |mut acc, utxo| {
            if utxo.is_confirmed() {
                acc.confirmed += utxo.value();
            } else {
                acc.unconfirmed += utxo.value();
            }
            acc
        })
    }

    pub fn details(&self, txid: &Txid) -> Option<TransactionDetails> {
        let stored = self.txs.get(txid)?;
        let received = stored
            .tx
            .output
            .iter()
            .filter(|out| self.is_mine(&out.script_pubkey))
            .map(|out| out.value.to_sat())
            .sum();
        let mut sent = 0;
        let mut inputs_total = Some(0u64);
        for input in &stored.tx.input {
            match self.prevout(&input.previous_output) {
                Some(prev) => {
                    if self.is_mine(&prev.script_pubkey) {
                        sent += prev.value.to_sat();
                    }
                    inputs_total = inputs_total.map(|t| t + prev.value.to_sat());
                }
                None => inputs_total = None,
            }
        }
        let outputs_total: u64 = stored.tx.output.iter().map(|out| out.value.to_sat()).sum();
        let fee = inputs_total.and_then(|t| t.checked_sub(outputs_total));

        Some(match stored.position {
            ChainPosition::Confirmed { height, timestamp } => {
                TransactionDetails::Confirmed { txid: *txid, height, timestamp, sent, received, fee }
            }
            ChainPosition::Unconfirmed => TransactionDetails::Unconfirmed { txid: *txid, sent, received, fee },
        })
    }

    /// Unconfirmed first, then confirmed from the newest block down.
    pub fn list(&self) -> Vec<TransactionDetails> {
        let mut all: Vec<TransactionDetails> = self.txs.keys().filter_map(|txid| self.details(txid)).collect();
        all.sort_by_key(|details| match details {
            TransactionDetails::Unconfirmed { .. } => (0, 0),
            TransactionDetails::Confirmed { height, .. } => (1, u32::MAX - height),
        });
        all
    }

    pub fn status(&self, txid: &Txid) -> Option<TxStatus> {
        if let Some(stored) = self.txs.get(txid) {
            return Some(match stored.position {
                ChainPosition::Confirmed { height, timestamp } => TxStatus::Confirmed { height, timestamp },
                ChainPosition::Unconfirmed => TxStatus::Unconfirmed,
            });
        }
        self.replaced.get(txid).map(|by| TxStatus::Replaced { by: *by })
    }

    /// Pays to or spends from this wallet.
    pub fn is_relevant(&self, tx: &Transaction) -> bool {
        tx.output.iter().any(|out| self.is_mine(&out.script_pubkey))
            || tx.input.iter().any(|input| self.owned_output(&input.previous_output).is_some())
    }

    /// Insert a transaction this wallet broadcast. Unconfirmed transactions
    /// spending the same outputs, and their descendants, are evicted and
    /// marked as replaced. Returns the evicted txids.
    pub fn record_local(&mut self, tx: Transaction) -> Vec<Txid> {
        let txid = tx.compute_txid();
        if self.txs.contains_key(&txid) {
            return Vec::new();
        }
        let spends: HashSet<OutPoint> = tx.input.iter().map(|input| input.previous_output).collect();
        let mut evicted: Vec<Txid> = self
            .txs
            .iter()
            .filter(|(_, stored)| !stored.is_confirmed())
            .filter(|(_, stored)| stored.tx.input.iter().any(|input| spends.contains(&input.previous_output)))
            .map(|(id, _)| *id)
            .collect();

        let mut queue = evicted.clone();
        while let Some(parent) = queue.pop() {
            let children: Vec<Txid> = self
                .txs
                .iter()
                .filter(|(id, stored)| {
                    !stored.is_confirmed()
                        && !evicted.contains(id)
                        && stored.tx.input.iter().any(|input| input.previous_output.txid == parent)
                })
                .map(|(id, _)| *id)
                .collect();
            evicted.extend(children.iter().copied());
            queue.extend(children);
        }

        for id in &evicted {
            self.txs.remove(id);
            self.replaced.insert(*id, txid);
        }
        self.txs.insert(txid, StoredTx { tx: Arc::new(tx), position: ChainPosition::Unconfirmed, local: true });
        evicted
    }

    /// Replace chain data with a scan result. Local broadcasts the server has
    /// not reported yet survive unless the server knows a conflicting spend.
    pub fn apply_sync(&mut self, update: SyncUpdate) {
        let mut txs = update.txs;
        let server_spends: HashSet<OutPoint> = txs
            .values()
            .flat_map(|stored| stored.tx.input.iter().map(|input| input.previous_output))
            .collect();
        for (txid, stored) in &self.txs {
            if stored.local
                && !txs.contains_key(txid)
                && !stored.tx.input.iter().any(|input| server_spends.contains(&input.previous_output))
            {
                txs.insert(*txid, stored.clone());
            }
        }

        self.txs = txs;
        self.tip_height = Some(update.tip_height);
        self.last_synced_url = Some(update.url);
        for keychain in Keychain::ALL {
            if let Some(index) = update.last_used.get(keychain) {
                if index + 1 > self.revealed.get(keychain) {
                    self.revealed.set(keychain, index + 1);
                }
            }
        }
        let known = &self.txs;
        self.replaced.retain(|txid, _| !known.contains_key(txid));
    }
}
