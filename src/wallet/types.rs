//! Values handed out by the wallet. All derived from local state.

use crate::keys::Keychain;
use bitcoin::{Address, OutPoint, TxOut, Txid};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
}

impl Balance {
    pub fn total(&self) -> u64 { self.confirmed + self.unconfirmed }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub keychain: Keychain,
    pub index: u32,
    pub address: Address,
}

/// Spendable output owned by one of the wallet's keychains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUtxo {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub keychain: Keychain,
    pub index: u32,
    pub confirmation_height: Option<u32>,
}

impl LocalUtxo {
    pub fn value(&self) -> u64 { self.txout.value.to_sat() }
    pub fn is_confirmed(&self) -> bool { self.confirmation_height.is_some() }
}

/// Where a stored transaction sits relative to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChainPosition {
    Confirmed { height: u32, timestamp: u64 },
    Unconfirmed,
}

/// Wallet view of a transaction. Amounts in sat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionDetails {
    Confirmed {
        txid: Txid,
        height: u32,
        timestamp: u64,
        sent: u64,
        received: u64,
        fee: Option<u64>,
    },
    Unconfirmed {
        txid: Txid,
        sent: u64,
        received: u64,
        fee: Option<u64>,
    },
}

impl TransactionDetails {
    pub fn txid(&self) -> Txid {
        match self {
            TransactionDetails::Confirmed { txid, .. } | TransactionDetails::Unconfirmed { txid, .. } => *txid,
        }
    }

    pub fn sent(&self) -> u64 {
        match self {
            TransactionDetails::Confirmed { sent, .. } | TransactionDetails::Unconfirmed { sent, .. } => *sent,
        }
    }

    pub fn received(&self) -> u64 {
        match self {
            TransactionDetails::Confirmed { received, .. } | TransactionDetails::Unconfirmed { received, .. } => *received,
        }
    }

    pub fn fee(&self) -> Option<u64> {
        match self {
            TransactionDetails::Confirmed { fee, .. } | TransactionDetails::Unconfirmed { fee, .. } => *fee,
        }
    }

    pub fn is_confirmed(&self) -> bool { matches!(self, TransactionDetails::Confirmed { .. }) }
}

/// Observable lifecycle of a transaction the wallet knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Unconfirmed,
    Confirmed { height: u32, timestamp: u64 },
    /// Evicted by an RBF replacement that the wallet broadcast.
    Replaced { by: Txid },
}
