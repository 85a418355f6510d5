//! JSON wallet database.
//!
//! Holds only public data: descriptors in their public form, indices, tip and
//! the raw transactions with their chain position. Every save goes to a temp
//! file first and is renamed over the old one.

use super::state::{PerKeychain, StoredTx, WalletState};
use super::types::ChainPosition;
use crate::error::{Result, WalletError};
use crate::network::Network;
use bitcoin::consensus::encode;
use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DB_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct DbFile {
    version: u32,
    network: Network,
    descriptor: String,
    change_descriptor: String,
    revealed: PerKeychain<u32>,
    tip_height: Option<u32>,
    last_synced_url: Option<String>,
    transactions: Vec<DbTx>,
    /// Replaced txid → replacing txid.
    #[serde(default)]
    replaced: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DbTx {
    hex: String,
    position: ChainPosition,
    #[serde(default)]
    local: bool,
}

/// File binding between a descriptor pair and its persisted state.
#[derive(Debug, Clone)]
pub(crate) struct WalletDb {
    path: PathBuf,
    network: Network,
    descriptor: String,
    change_descriptor: String,
}

impl WalletDb {
    /// Open the database at `path`, creating it when missing. Existing files
    /// must carry the same network and descriptors.
    pub fn open(path: &Path, network: Network, descriptor: &str, change_descriptor: &str) -> Result<(Self, WalletState)> {
        let db = Self {
            path: path.to_path_buf(),
            network,
            descriptor: descriptor.to_string(),
            change_descriptor: change_descriptor.to_string(),
        };

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| WalletError::storage("create wallet dir", e))?;
            }
            let state = WalletState::default();
            db.save(&state)?;
            tracing::info!(path = %path.display(), %network, "created wallet database");
            return Ok((db, state));
        }

        let raw = std::fs::read_to_string(path).map_err(|e| WalletError::storage("read wallet db", e))?;
        let file: DbFile = serde_json::from_str(&raw).map_err(|e| WalletError::storage("parse wallet db", e))?;
        if file.version != DB_VERSION {
            return Err(WalletError::Storage(format!("unsupported wallet db version {}", file.version)));
        }
        if file.network != network {
            return Err(WalletError::StateConflict(format!("database is for {}, not {}", file.network, network)));
        }
        if file.descriptor != descriptor || file.change_descriptor != change_descriptor {
            return Err(WalletError::StateConflict(format!("{} holds another wallet", path.display())));
        }

        let state = decode(file)?;
        tracing::info!(path = %path.display(), transactions = state.txs.len(), "loaded wallet database");
        Ok((db, state))
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn save(&self, state: &WalletState) -> Result<()> {
        let file = DbFile {
            version: DB_VERSION,
            network: self.network,
            descriptor: self.descriptor.clone(),
            change_descriptor: self.change_descriptor.clone(),
            revealed: state.revealed,
            tip_height: state.tip_height,
            last_synced_url: state.last_synced_url.clone(),
            transactions: state
                .txs
                .values()
                .map(|stored| DbTx {
                    hex: encode::serialize_hex(stored.tx.as_ref()),
                    position: stored.position,
                    local: stored.local,
                })
                .collect(),
            replaced: state.replaced.iter().map(|(old, new)| (old.to_string(), new.to_string())).collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| WalletError::storage("encode wallet db", e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| WalletError::storage("write wallet db", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| WalletError::storage("replace wallet db", e))?;
        tracing::debug!(path = %self.path.display(), transactions = state.txs.len(), "persisted wallet state");
        Ok(())
    }
}

fn decode(file: DbFile) -> Result<WalletState> {
    let mut state = WalletState {
        revealed: file.revealed,
        tip_height: file.tip_height,
        last_synced_url: file.last_synced_url,
        ..WalletState::default()
    };
    for entry in file.transactions {
        let bytes = hex::decode(&entry.hex).map_err(|e| WalletError::storage("decode transaction hex", e))?;
        let tx: Transaction = encode::deserialize(&bytes).map_err(|e| WalletError::storage("decode transaction", e))?;
        state.txs.insert(
            tx.compute_txid(),
            StoredTx { tx: Arc::new(tx), position: entry.position, local: entry.local },
        );
    }
    for (old, new) in file.replaced {
        let old: Txid = old.parse().map_err(|e| WalletError::storage("decode replaced txid", e))?;
        let new: Txid = new.parse().map_err(|e| WalletError::storage("decode replaced txid", e))?;
        state.replaced.insert(old, new);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
    use tempfile::TempDir;

    fn sample_tx(value: u64) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut { value: Amount::from_sat(value), script_pubkey: ScriptBuf::new() }],
        }
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        let (db, mut state) = WalletDb::open(&path, Network::Regtest, "ext", "int").unwrap();
        let tx = sample_tx(5_000);
        let txid = tx.compute_txid();
        state.txs.insert(
            txid,
            StoredTx { tx: Arc::new(tx), position: ChainPosition::Confirmed { height: 12, timestamp: 99 }, local: false },
        );
        state.revealed.external = 4;
        state.tip_height = Some(20);
        db.save(&state).unwrap();

        let (_, loaded) = WalletDb::open(&path, Network::Regtest, "ext", "int").unwrap();
        assert_eq!(loaded.revealed.external, 4);
        assert_eq!(loaded.tip_height, Some(20));
        assert_eq!(loaded.txs[&txid].position, ChainPosition::Confirmed { height: 12, timestamp: 99 });
    }

    #[test]
    fn test_conflicting_descriptors_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        WalletDb::open(&path, Network::Regtest, "ext", "int").unwrap();

        let err = WalletDb::open(&path, Network::Regtest, "other", "int").unwrap_err();
        assert!(matches!(err, WalletError::StateConflict(_)));
        let err = WalletDb::open(&path, Network::Signet, "ext", "int").unwrap_err();
        assert!(matches!(err, WalletError::StateConflict(_)));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("wallet.json");
        let (db, state) = WalletDb::open(&path, Network::Testnet, "ext", "int").unwrap();
        db.save(&state).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
