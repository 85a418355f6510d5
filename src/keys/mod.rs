//! Keys - BIP39 mnemonics and BIP32 master keys.
//!
//! The mnemonic and master key never leave this module except through an
//! [`ExtendedKey`], which the wallet owns during creation or recovery and the
//! caller persists as a secret.

pub mod descriptor;

use crate::error::{Result, WalletError};
use crate::network::Network;
use bip39::Mnemonic;
use bitcoin::bip32::{Fingerprint, Xpriv};
use bitcoin::secp256k1::Secp256k1;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroize;

pub use descriptor::{change_descriptor, receive_descriptor, DerivedAddress, Keychain, WalletDescriptor};

/// Supported mnemonic lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordCount {
    #[default]
    Words12,
    Words15,
    Words18,
    Words21,
    Words24,
}

impl WordCount {
    pub fn words(&self) -> usize {
        match self {
            WordCount::Words12 => 12,
            WordCount::Words15 => 15,
            WordCount::Words18 => 18,
            WordCount::Words21 => 21,
            WordCount::Words24 => 24,
        }
    }

    /// 32 bits of entropy per 3 words.
    fn entropy_bytes(&self) -> usize { self.words() * 4 / 3 }
}

/// Master extended private key plus the mnemonic that produced it.
#[derive(Clone)]
pub struct ExtendedKey {
    network: Network,
    xprv: Xpriv,
    mnemonic: Mnemonic,
}

impl ExtendedKey {
    pub fn network(&self) -> Network { self.network }
    pub fn xprv(&self) -> &Xpriv { &self.xprv }
    pub fn mnemonic(&self) -> &Mnemonic { &self.mnemonic }

    pub fn fingerprint(&self) -> Fingerprint {
        self.xprv.fingerprint(&Secp256k1::signing_only())
    }
}

impl fmt::Debug for ExtendedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKey")
            .field("network", &self.network)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Mnemonic generation and restoration.
pub struct KeyMaterial;

impl KeyMaterial {
    /// Fresh mnemonic from the OS RNG, then the master key for `network`.
    pub fn generate(network: Network, word_count: WordCount) -> Result<ExtendedKey> {
        let mut entropy = vec![0u8; word_count.entropy_bytes()];
        OsRng
            .try_fill_bytes(&mut entropy)
            .map_err(|e| WalletError::Entropy(e.to_string()))?;
        let mnemonic = Mnemonic::from_entropy(&entropy);
        entropy.zeroize();
        let mnemonic = mnemonic.map_err(|e| WalletError::Entropy(e.to_string()))?;
        Self::derive(network, mnemonic, "")
    }

    pub fn restore(network: Network, words: &str) -> Result<ExtendedKey> {
        Self::restore_with_passphrase(network, words, "")
    }

    pub fn restore_with_passphrase(network: Network, words: &str, passphrase: &str) -> Result<ExtendedKey> {
        let mnemonic = Mnemonic::parse_normalized(words.trim())
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Self::derive(network, mnemonic, passphrase)
    }

    fn derive(network: Network, mnemonic: Mnemonic, passphrase: &str) -> Result<ExtendedKey> {
        let mut seed = mnemonic.to_seed(passphrase);
        let xprv = Xpriv::new_master(network.to_bitcoin(), &seed);
        seed.zeroize();
        let xprv = xprv.map_err(|e| WalletError::Entropy(format!("master key derivation: {e}")))?;
        tracing::debug!(network = %network, words = mnemonic.word_count(), "derived master key");
        Ok(ExtendedKey { network, xprv, mnemonic })
    }
}
