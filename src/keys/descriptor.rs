//! BIP84 descriptors.
//!
//! Builds `wpkh(<xprv>/84'/<coin>'/0'/<0|1>/*)` strings from a master key and
//! parses descriptor strings back into a [`WalletDescriptor`] that derives
//! scripts, addresses and BIP32 key sources. Only single-sig native segwit is
//! accepted.

use super::ExtendedKey;
use crate::error::{Result, WalletError};
use crate::network::Network;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, VerifyOnly};
use bitcoin::{Address, CompressedPublicKey, NetworkKind, ScriptBuf};
use miniscript::descriptor::{Descriptor, DescriptorPublicKey, DescriptorSecretKey, Wildcard};
use serde::{Deserialize, Serialize};
use std::fmt;

const PURPOSE: u32 = 84;
const ACCOUNT: u32 = 0;

/// Receive or change branch of the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keychain { External, Internal }

impl Keychain {
    pub const ALL: [Keychain; 2] = [Keychain::External, Keychain::Internal];

    /// Path segment after the account: 0 receive, 1 change.
    pub fn branch(&self) -> u32 {
        match self { Keychain::External => 0, Keychain::Internal => 1 }
    }

    pub fn as_str(&self) -> &'static str {
        match self { Keychain::External => "external", Keychain::Internal => "internal" }
    }
}

pub fn receive_descriptor(key: &ExtendedKey) -> String { bip84(key, Keychain::External) }

pub fn change_descriptor(key: &ExtendedKey) -> String { bip84(key, Keychain::Internal) }

fn bip84(key: &ExtendedKey, keychain: Keychain) -> String {
    format!(
        "wpkh({}/{}'/{}'/{}'/{}/*)",
        key.xprv(),
        PURPOSE,
        key.network().coin_type(),
        ACCOUNT,
        keychain.branch()
    )
}

/// One derived receive or change output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub keychain: Keychain,
    pub index: u32,
    pub address: Address,
    pub script_pubkey: ScriptBuf,
    pub public_key: PublicKey,
    pub key_source: KeySource,
}

/// Parsed `wpkh` descriptor bound to one keychain.
#[derive(Clone)]
pub struct WalletDescriptor {
    network: Network,
    keychain: Keychain,
    public: String,
    fingerprint: Fingerprint,
    /// Origin path plus the unhardened branch, e.g. `84'/1'/0'/0`.
    branch_path: DerivationPath,
    /// Key the wildcard index is derived from.
    xpub: Xpub,
    /// Unhardened steps between `xpub` and the wildcard.
    xpub_path: DerivationPath,
    master: Option<Xpriv>,
    secp: Secp256k1<VerifyOnly>,
}

impl WalletDescriptor {
    pub fn parse(descriptor: &str, network: Network) -> Result<Self> {
        let secp = Secp256k1::new();
        let (desc, keymap) = Descriptor::<DescriptorPublicKey>::parse_descriptor(&secp, descriptor.trim())
            .map_err(|e| WalletError::InvalidDescriptor(e.to_string()))?;

        let key = match &desc {
            Descriptor::Wpkh(wpkh) => wpkh.as_inner().clone(),
            other => return Err(invalid(format!("only wpkh descriptors are supported, got {}", other))),
        };
        let xkey = match key {
            DescriptorPublicKey::XPub(xkey) => xkey,
            _ => return Err(invalid("descriptor key must be an extended key")),
        };
        if xkey.wildcard != Wildcard::Unhardened {
            return Err(invalid("descriptor must end in an unhardened wildcard"));
        }
        if xkey.xkey.network != NetworkKind::from(network.to_bitcoin()) {
            return Err(invalid(format!("extended key is not for {}", network)));
        }

        let (fingerprint, origin_path) = match &xkey.origin {
            Some((fp, path)) => (*fp, path.clone()),
            None => (xkey.xkey.fingerprint(), DerivationPath::master()),
        };
        let branch_path = origin_path.extend(&xkey.derivation_path);
        let keychain = check_bip84_path(&branch_path, network)?;

        let master = keymap.iter().find_map(|(_, secret)| match secret {
            DescriptorSecretKey::XPrv(x) if x.origin.is_none() => Some(x.xkey),
            _ => None,
        });

        tracing::debug!(keychain = keychain.as_str(), %fingerprint, path = %branch_path, "parsed descriptor");

        Ok(Self {
            network,
            keychain,
            public: desc.to_string(),
            fingerprint,
            branch_path,
            xpub: xkey.xkey,
            xpub_path: xkey.derivation_path,
            master,
            secp: Secp256k1::verification_only(),
        })
    }

    pub fn keychain(&self) -> Keychain { self.keychain }
    pub fn network(&self) -> Network { self.network }
    pub fn master_fingerprint(&self) -> Fingerprint { self.fingerprint }

    /// Canonical public form with checksum; safe to persist.
    pub fn public_string(&self) -> &str { &self.public }

    /// Master key, when the descriptor string carried it.
    pub fn signing_key(&self) -> Option<&Xpriv> { self.master.as_ref() }

    /// Account path shared by both keychains, e.g. `84'/1'/0'`.
    pub fn account_path(&self) -> DerivationPath {
        let steps: &[ChildNumber] = self.branch_path.as_ref();
        DerivationPath::from(steps[..3].to_vec())
    }

    pub fn derive(&self, index: u32) -> Result<DerivedAddress> {
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| invalid(format!("index {index}: {e}")))?;
        let xpub = self
            .xpub
            .derive_pub(&self.secp, &self.xpub_path.child(child))
            .map_err(|e| invalid(format!("derive {index}: {e}")))?;
        let compressed = CompressedPublicKey(xpub.public_key);
        let address = Address::p2wpkh(&compressed, self.network.to_bitcoin());
        Ok(DerivedAddress {
            keychain: self.keychain,
            index,
            script_pubkey: address.script_pubkey(),
            address,
            public_key: xpub.public_key,
            key_source: (self.fingerprint, self.branch_path.child(child)),
        })
    }
}

impl fmt::Debug for WalletDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletDescriptor")
            .field("keychain", &self.keychain)
            .field("public", &self.public)
            .field("has_signing_key", &self.master.is_some())
            .finish()
    }
}

fn invalid(msg: impl Into<String>) -> WalletError { WalletError::InvalidDescriptor(msg.into()) }

fn check_bip84_path(path: &DerivationPath, network: Network) -> Result<Keychain> {
    let steps: &[ChildNumber] = path.as_ref();
    let expected_prefix = [
        ChildNumber::Hardened { index: PURPOSE },
        ChildNumber::Hardened { index: network.coin_type() },
        ChildNumber::Hardened { index: ACCOUNT },
    ];
    if steps.len() != 4 || steps[..3] != expected_prefix {
        return Err(invalid(format!(
            "derivation path {} is not 84'/{}'/0'/<0|1>",
            path,
            network.coin_type()
        )));
    }
    match steps[3] {
        ChildNumber::Normal { index: 0 } => Ok(Keychain::External),
        ChildNumber::Normal { index: 1 } => Ok(Keychain::Internal),
        other => Err(invalid(format!("unexpected branch {other}"))),
    }
}
