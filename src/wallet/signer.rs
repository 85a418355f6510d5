//! PSBT signing with the wallet's master key.
//!
//! Only inputs whose BIP32 derivation points back at this key on a BIP84 path
//! are signed. Everything else is left for another signer.

use crate::error::{Result, WalletError};
use crate::keys::ExtendedKey;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv};
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{CompressedPublicKey, NetworkKind, Psbt, ScriptBuf, Transaction, Txid, Witness};

/// Finalized transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Absolute fee in sat.
    pub fee: u64,
}

impl SignedTransaction {
    pub fn txid(&self) -> Txid { self.tx.compute_txid() }
}

pub struct Signer {
    xprv: Xpriv,
    fingerprint: Fingerprint,
    secp: Secp256k1<All>,
}

impl Signer {
    pub fn new(key: &ExtendedKey) -> Self { Self::from_xprv(*key.xprv()) }

    pub fn from_xprv(xprv: Xpriv) -> Self {
        let secp = Secp256k1::new();
        let fingerprint = xprv.fingerprint(&secp);
        Self { xprv, fingerprint, secp }
    }

    pub fn fingerprint(&self) -> Fingerprint { self.fingerprint }

    /// Sign input `index` if this key owns it. Returns whether a signature
    /// was added.
    pub fn sign_input(&self, psbt: &mut Psbt, index: usize) -> Result<bool> {
        let input = psbt
            .inputs
            .get(index)
            .ok_or_else(|| WalletError::IncompletePsbt(format!("no input at index {index}")))?;
        if input.final_script_witness.is_some() {
            return Ok(false);
        }

        let Some((pubkey, path)) = input
            .bip32_derivation
            .iter()
            .find(|(_, (fp, path))| *fp == self.fingerprint && self.is_wallet_path(path))
            .map(|(pk, (_, path))| (*pk, path.clone()))
        else {
            return Ok(false);
        };

        let utxo = input
            .witness_utxo
            .clone()
            .ok_or_else(|| WalletError::IncompletePsbt(format!("input {index} is missing its witness utxo")))?;

        let child = self
            .xprv
            .derive_priv(&self.secp, &path)
            .map_err(|e| WalletError::Signature(format!("derive {path}: {e}")))?;
        let derived = child.private_key.public_key(&self.secp);
        let script = ScriptBuf::new_p2wpkh(&CompressedPublicKey(derived).wpubkey_hash());
        if derived != pubkey || utxo.script_pubkey != script {
            tracing::debug!(index, %path, "derivation does not match input script, skipping");
            return Ok(false);
        }

        let sighash = SighashCache::new(&psbt.unsigned_tx)
            .p2wpkh_signature_hash(index, &utxo.script_pubkey, utxo.value, EcdsaSighashType::All)
            .map_err(|e| WalletError::Signature(format!("sighash for input {index}: {e}")))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = self.secp.sign_ecdsa(&message, &child.private_key);

        psbt.inputs[index].partial_sigs.insert(
            bitcoin::PublicKey::new(derived),
            ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All },
        );
        tracing::debug!(index, %path, "signed input");
        Ok(true)
    }

    /// Sign every owned input and finalize. `psbt` is only updated when the
    /// whole transaction could be finalized.
    pub fn sign(&self, psbt: &mut Psbt) -> Result<SignedTransaction> {
        let mut working = psbt.clone();
        let mut signed = 0;
        for index in 0..working.inputs.len() {
            if self.sign_input(&mut working, index)? {
                signed += 1;
            }
        }
        let result = finalize(&mut working)?;
        tracing::info!(txid = %result.txid(), inputs = signed, fee = result.fee, "signed transaction");
        *psbt = working;
        Ok(result)
    }

    /// `84'/<coin>'/0'/<0|1>/<index>` for this key's network.
    fn is_wallet_path(&self, path: &DerivationPath) -> bool {
        let coin = match self.xprv.network {
            NetworkKind::Main => 0,
            NetworkKind::Test => 1,
        };
        let steps: &[ChildNumber] = path.as_ref();
        matches!(
            steps,
            [
                ChildNumber::Hardened { index: 84 },
                ChildNumber::Hardened { index: c },
                ChildNumber::Hardened { index: 0 },
                ChildNumber::Normal { index: 0 | 1 },
                ChildNumber::Normal { .. },
            ] if *c == coin
        )
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("fingerprint", &self.fingerprint).finish_non_exhaustive()
    }
}

/// Turn partial signatures into final witnesses and extract the transaction.
/// Signing order does not matter; the txid is the unsigned transaction's.
pub fn finalize(psbt: &mut Psbt) -> Result<SignedTransaction> {
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let script = input
            .witness_utxo
            .as_ref()
            .map(|utxo| utxo.script_pubkey.clone())
            .ok_or_else(|| WalletError::IncompletePsbt(format!("input {index} has no witness utxo")))?;
        // Only a signature from the key the output pays to makes a valid witness.
        let (pubkey, signature) = input
            .partial_sigs
            .iter()
            .find(|(pk, _)| ScriptBuf::new_p2wpkh(&CompressedPublicKey(pk.inner).wpubkey_hash()) == script)
            .map(|(pk, sig)| (pk.inner, *sig))
            .ok_or_else(|| WalletError::IncompletePsbt(format!("input {index} has no signature for its script")))?;
        input.final_script_witness = Some(Witness::p2wpkh(&signature, &pubkey));
        input.partial_sigs.clear();
        input.bip32_derivation.clear();
    }

    let fee = psbt
        .fee()
        .map_err(|e| WalletError::IncompletePsbt(format!("cannot compute fee: {e}")))?
        .to_sat();
    let mut tx = psbt.unsigned_tx.clone();
    for (txin, input) in tx.input.iter_mut().zip(&psbt.inputs) {
        txin.witness = input.final_script_witness.clone().unwrap_or_default();
    }
    Ok(SignedTransaction { tx, fee })
}
