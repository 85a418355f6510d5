//! TCP/SSL transport over `electrum-client` (re-exported by bdk_electrum).

use super::{Connector, ElectrumBackend, ElectrumError, HistoryEntry};
use bdk_electrum::electrum_client::{self, Client, ConfigBuilder, ElectrumApi};
use bitcoin::{Script, Transaction, Txid};
use std::sync::Arc;

/// Connects with transport-level retry and socket timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub retry: u8,
    pub timeout_secs: Option<u8>,
}

impl Default for TcpConnector {
    fn default() -> Self { Self { retry: 3, timeout_secs: Some(10) } }
}

impl Connector for TcpConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn ElectrumBackend>, ElectrumError> {
        let config = ConfigBuilder::new()
            .retry(self.retry)
            .timeout(self.timeout_secs)
            .build();
        let client = Client::from_config(url, config).map_err(connection)?;
        Ok(Arc::new(TcpBackend { client }))
    }
}

struct TcpBackend {
    client: Client,
}

impl ElectrumBackend for TcpBackend {
    fn tip_height(&self) -> Result<u32, ElectrumError> {
        let tip = self.client.block_headers_subscribe().map_err(connection)?;
        Ok(tip.height as u32)
    }

    fn block_timestamp(&self, height: u32) -> Result<u64, ElectrumError> {
        let header = self.client.block_header(height as usize).map_err(connection)?;
        Ok(header.time as u64)
    }

    fn script_history(&self, script: &Script) -> Result<Vec<HistoryEntry>, ElectrumError> {
        let history = self.client.script_get_history(script).map_err(connection)?;
        Ok(history.into_iter().map(|h| HistoryEntry { txid: h.tx_hash, height: h.height }).collect())
    }

    fn transaction(&self, txid: &Txid) -> Result<Transaction, ElectrumError> {
        self.client.transaction_get(txid).map_err(connection)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ElectrumError> {
        self.client.transaction_broadcast(tx).map_err(|e| match e {
            electrum_client::Error::Protocol(value) => ElectrumError::Rejected(value.to_string()),
            other => connection(other),
        })
    }

    fn estimate_fee(&self, target_blocks: usize) -> Result<f32, ElectrumError> {
        // Server answers in BTC/kvB; -1 when it has no estimate.
        let btc_per_kvb = self.client.estimate_fee(target_blocks).map_err(connection)?;
        if btc_per_kvb <= 0.0 {
            return Err(ElectrumError::Rejected(format!("no fee estimate for {target_blocks} blocks")));
        }
        Ok((btc_per_kvb * 100_000.0) as f32)
    }
}

fn connection(err: electrum_client::Error) -> ElectrumError {
    ElectrumError::Connection(err.to_string())
}
