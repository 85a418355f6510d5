//! Wallet configuration - constructed by the embedding application or the CLI.

use crate::network::Network;
use crate::wallet::DEFAULT_LOOKAHEAD;
use std::path::PathBuf;

const DB_FILE: &str = "wallet.json";
const STORE_FILE: &str = "secrets.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    pub network: Network,
    /// Custom Electrum URL; the network default when `None`.
    pub electrum_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub lookahead: u32,
    pub electrum_retry: u8,
    pub electrum_timeout: Option<u8>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            electrum_url: None,
            data_dir: None,
            lookahead: DEFAULT_LOOKAHEAD,
            electrum_retry: 3,
            electrum_timeout: Some(10),
        }
    }
}

impl WalletConfig {
    pub fn new(network: Network) -> Self { Self { network, ..Default::default() } }
    pub fn mainnet() -> Self { Self::new(Network::Bitcoin) }
    pub fn testnet() -> Self { Self::new(Network::Testnet) }
    pub fn signet() -> Self { Self::new(Network::Signet) }
    pub fn regtest() -> Self { Self::new(Network::Regtest) }

    pub fn with_electrum(mut self, url: impl Into<String>) -> Self { self.electrum_url = Some(url.into()); self }
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self { self.data_dir = Some(path.into()); self }
    pub fn with_lookahead(mut self, lookahead: u32) -> Self { self.lookahead = lookahead; self }
    pub fn with_electrum_retry(mut self, retry: u8) -> Self { self.electrum_retry = retry; self }
    pub fn with_electrum_timeout(mut self, secs: Option<u8>) -> Self { self.electrum_timeout = secs; self }

    /// Defaults overridden by `SATCHEL_NETWORK`, `SATCHEL_ELECTRUM_URL`,
    /// `SATCHEL_DATA_DIR` and `SATCHEL_LOOKAHEAD`. Unparseable values are
    /// ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(network) = env_var("SATCHEL_NETWORK") {
            match network.parse() {
                Ok(network) => config.network = network,
                Err(e) => tracing::warn!(error = %e, "ignoring SATCHEL_NETWORK"),
            }
        }
        config.electrum_url = env_var("SATCHEL_ELECTRUM_URL");
        config.data_dir = env_var("SATCHEL_DATA_DIR").map(PathBuf::from);
        if let Some(lookahead) = env_var("SATCHEL_LOOKAHEAD") {
            match lookahead.parse() {
                Ok(n) => config.lookahead = n,
                Err(e) => tracing::warn!(value = %lookahead, error = %e, "ignoring SATCHEL_LOOKAHEAD"),
            }
        }
        config
    }

    /// `data_dir`, else `$SATCHEL_ROOT/<network>`, else the platform data dir.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let root = std::env::var("SATCHEL_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("satchel"));
        root.join(self.network.as_str())
    }

    pub fn db_path(&self) -> PathBuf { self.data_dir().join(DB_FILE) }

    pub fn store_path(&self) -> PathBuf { self.data_dir().join(STORE_FILE) }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
