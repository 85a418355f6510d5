//! Secret storage for descriptors and the mnemonic.
//!
//! The wallet database never sees private keys; whatever holds them sits
//! behind [`WalletStore`]. `FileStore` keeps them in an owner-only JSON file,
//! `MemoryStore` in process memory.

use crate::error::{Result, WalletError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// What the application needs to reopen a wallet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialWalletData {
    pub path: PathBuf,
    pub descriptor: String,
    pub change_descriptor: String,
}

impl std::fmt::Debug for InitialWalletData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialWalletData").field("path", &self.path).finish_non_exhaustive()
    }
}

pub trait WalletStore: Send + Sync {
    fn save_wallet(&self, path: &Path, descriptor: &str, change_descriptor: &str) -> Result<()>;
    fn save_mnemonic(&self, words: &str) -> Result<()>;
    fn initial_wallet_data(&self) -> Result<Option<InitialWalletData>>;
    fn mnemonic(&self) -> Result<Option<String>>;
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct Secrets {
    wallet: Option<InitialWalletData>,
    mnemonic: Option<String>,
}

/// JSON file, mode 0600 on unix.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), lock: Mutex::new(()) } }

    pub fn path(&self) -> &Path { &self.path }

    fn load(&self) -> Result<Secrets> {
        if !self.path.exists() {
            return Ok(Secrets::default());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| WalletError::storage("read secrets", e))?;
        serde_json::from_str(&raw).map_err(|e| WalletError::storage("parse secrets", e))
    }

    fn modify(&self, change: impl FnOnce(&mut Secrets)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut secrets = self.load()?;
        change(&mut secrets);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| WalletError::storage("create secrets dir", e))?;
        }
        let json = serde_json::to_string_pretty(&secrets).map_err(|e| WalletError::storage("encode secrets", e))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| WalletError::storage("write secrets", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| WalletError::storage("restrict secrets", e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| WalletError::storage("replace secrets", e))?;
        tracing::debug!(path = %self.path.display(), "secrets saved");
        Ok(())
    }
}

impl WalletStore for FileStore {
    fn save_wallet(&self, path: &Path, descriptor: &str, change_descriptor: &str) -> Result<()> {
        let data = InitialWalletData {
            path: path.to_path_buf(),
            descriptor: descriptor.to_string(),
            change_descriptor: change_descriptor.to_string(),
        };
        self.modify(|s| s.wallet = Some(data))
    }

    fn save_mnemonic(&self, words: &str) -> Result<()> {
        let words = words.to_string();
        self.modify(|s| s.mnemonic = Some(words))
    }

    fn initial_wallet_data(&self) -> Result<Option<InitialWalletData>> { Ok(self.load()?.wallet) }

    fn mnemonic(&self) -> Result<Option<String>> { Ok(self.load()?.mnemonic) }
}

/// In-process store for tests and ephemeral wallets.
#[derive(Default)]
pub struct MemoryStore {
    secrets: Mutex<Secrets>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn with<T>(&self, f: impl FnOnce(&mut Secrets) -> T) -> T {
        f(&mut self.secrets.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl WalletStore for MemoryStore {
    fn save_wallet(&self, path: &Path, descriptor: &str, change_descriptor: &str) -> Result<()> {
        self.with(|s| {
            s.wallet = Some(InitialWalletData {
                path: path.to_path_buf(),
                descriptor: descriptor.to_string(),
                change_descriptor: change_descriptor.to_string(),
            })
        });
        Ok(())
    }

    fn save_mnemonic(&self, words: &str) -> Result<()> {
        self.with(|s| s.mnemonic = Some(words.to_string()));
        Ok(())
    }

    fn initial_wallet_data(&self) -> Result<Option<InitialWalletData>> { Ok(self.with(|s| s.wallet.clone())) }

    fn mnemonic(&self) -> Result<Option<String>> { Ok(self.with(|s| s.mnemonic.clone())) }
}
