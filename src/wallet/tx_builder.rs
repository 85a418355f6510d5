//! Transaction building: new payments, drains and RBF fee bumps.
//!
//! Builders only collect options. All validation happens in `finish`, which
//! reads one snapshot of the wallet and returns an unsigned PSBT.

use super::coin_selection::{self, FeePolicy, Selection, Strategy, Target};
use super::state::WalletState;
use super::types::LocalUtxo;
use super::Wallet;
use crate::error::{Result, WalletError};
use crate::keys::{DerivedAddress, Keychain};
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, Psbt, Sequence, Transaction, TxIn, TxOut, Txid};
use std::collections::HashSet;

/// sat/vB used when the caller sets none.
pub const DEFAULT_FEE_RATE: f32 = 1.0;

/// Payment to one address, in sat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub amount: u64,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: u64) -> Self { Self { address: address.into(), amount } }
}

/// Builder for a new transaction.
///
/// ```no_run
/// # use satchel::wallet::{TxBuilder, Wallet};
/// # fn build(wallet: &Wallet) -> satchel::Result<()> {
/// let psbt = TxBuilder::new()
///     .add_recipient("tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl", 25_000)
///     .fee_rate(2.0)
///     .enable_rbf()
///     .finish(wallet)?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TxBuilder {
    recipients: Vec<Recipient>,
    drain_wallet: bool,
    drain_to: Option<String>,
    fee_rate: Option<f32>,
    rbf: bool,
}

impl TxBuilder {
    pub fn new() -> Self { Self::default() }

    /// Outputs keep the order of these calls.
    pub fn add_recipient(&mut self, address: impl Into<String>, amount: u64) -> &mut Self {
        self.recipients.push(Recipient::new(address, amount));
        self
    }

    /// Spend every wallet output. Requires `drain_to`.
    pub fn drain_wallet(&mut self) -> &mut Self {
        self.drain_wallet = true;
        self
    }

    pub fn drain_to(&mut self, address: impl Into<String>) -> &mut Self {
        self.drain_to = Some(address.into());
        self
    }

    pub fn fee_rate(&mut self, sat_per_vb: f32) -> &mut Self {
        self.fee_rate = Some(sat_per_vb);
        self
    }

    pub fn enable_rbf(&mut self) -> &mut Self {
        self.rbf = true;
        self
    }

    pub fn finish(&self, wallet: &Wallet) -> Result<Psbt> {
        let drain = match (self.drain_wallet, &self.drain_to) {
            (true, Some(_)) if !self.recipients.is_empty() => {
                return Err(WalletError::InvalidBuilderState("drain cannot be combined with recipients".into()))
            }
            (true, Some(to)) => Some(to),
            (true, None) => return Err(WalletError::InvalidBuilderState("drain_wallet requires drain_to".into())),
            (false, Some(_)) => return Err(WalletError::InvalidBuilderState("drain_to requires drain_wallet".into())),
            (false, None) if self.recipients.is_empty() => {
                return Err(WalletError::InvalidBuilderState("no recipients".into()))
            }
            (false, None) => None,
        };
        let rate = coin_selection::fee_rate_from_sat_per_vb(self.fee_rate.unwrap_or(DEFAULT_FEE_RATE))?;
        let sequence = if self.rbf { Sequence::ENABLE_RBF_NO_LOCKTIME } else { Sequence::ENABLE_LOCKTIME_NO_RBF };

        let snapshot = wallet.snapshot();
        let utxos = snapshot.unspent();

        if let Some(to) = drain {
            let script = wallet.parse_address(to)?.script_pubkey();
            let available = coin_selection::total_value(&utxos);
            let weight = coin_selection::tx_weight(utxos.len().max(1), &[coin_selection::output_size(&script)]);
            let fee = coin_selection::fee_for_weight(rate, weight);
            let dust = coin_selection::dust_limit(&script);
            let amount = match available.checked_sub(fee) {
                Some(amount) if amount >= dust && !utxos.is_empty() => amount,
                _ => return Err(WalletError::InsufficientFunds { needed: fee.saturating_add(dust), available }),
            };
            tracing::debug!(inputs = utxos.len(), amount, fee, "draining wallet");
            let output = TxOut { value: Amount::from_sat(amount), script_pubkey: script };
            return build_psbt(wallet, &snapshot, &utxos, vec![output], None, sequence);
        }

        let mut outputs = Vec::with_capacity(self.recipients.len() + 1);
        for recipient in &self.recipients {
            let script = wallet.parse_address(&recipient.address)?.script_pubkey();
            let limit = coin_selection::dust_limit(&script);
            if recipient.amount < limit {
                return Err(WalletError::OutputBelowDust { amount: recipient.amount, limit });
            }
            outputs.push(TxOut { value: Amount::from_sat(recipient.amount), script_pubkey: script });
        }
        // No wallet can hold more than MAX_MONEY, so a larger request is a
        // funds problem rather than an arithmetic one.
        let amount = self
            .recipients
            .iter()
            .try_fold(0u64, |sum, r| sum.checked_add(r.amount))
            .filter(|total| *total <= Amount::MAX_MONEY.to_sat());
        let Some(amount) = amount else {
            return Err(WalletError::InsufficientFunds {
                needed: self.recipients.iter().fold(0u64, |sum, r| sum.saturating_add(r.amount)),
                available: coin_selection::total_value(&utxos),
            });
        };

        let change = wallet.descriptor(Keychain::Internal).derive(snapshot.next_change_index())?;
        let sizes: Vec<u64> = outputs.iter().map(|o| coin_selection::output_size(&o.script_pubkey)).collect();
        let target = Target {
            amount,
            output_sizes: &sizes,
            change_script: &change.script_pubkey,
        };
        let selection = coin_selection::select(vec![], utxos, &target, FeePolicy::new(rate), Strategy::BranchAndBound)?;
        log_selection(&selection, target.amount);
        let change = selection.change.map(|value| (value, &change));
        build_psbt(wallet, &snapshot, &selection.inputs, outputs, change, sequence)
    }
}

/// Builder for an RBF replacement of an unconfirmed wallet transaction.
#[derive(Debug, Clone)]
pub struct BumpFeeTxBuilder {
    txid: Txid,
    fee_rate: f32,
}

impl BumpFeeTxBuilder {
    pub fn new(txid: Txid, new_fee_rate: f32) -> Self { Self { txid, fee_rate: new_fee_rate } }

    /// Keeps every original input and every non-change output in order,
    /// recomputes change and adds inputs largest-first when needed.
    pub fn finish(&self, wallet: &Wallet) -> Result<Psbt> {
        let rate = coin_selection::fee_rate_from_sat_per_vb(self.fee_rate)?;
        let snapshot = wallet.snapshot();
        let original = match snapshot.txs.get(&self.txid) {
            Some(stored) if !stored.is_confirmed() => stored.tx.clone(),
            Some(_) => return Err(WalletError::TransactionNotFound(format!("{} is already confirmed", self.txid))),
            None => return Err(WalletError::TransactionNotFound(self.txid.to_string())),
        };
        if !original.is_explicitly_rbf() {
            return Err(WalletError::NotReplaceable(self.txid.to_string()));
        }

        let required = original
            .input
            .iter()
            .map(|input| {
                snapshot
                    .owned_output(&input.previous_output)
                    .ok_or_else(|| WalletError::UnknownUtxo(input.previous_output.to_string()))
            })
            .collect::<Result<Vec<LocalUtxo>>>()?;

        let input_total = coin_selection::total_value(&required);
        let output_total = original.output.iter().fold(0u64, |sum, o| sum.saturating_add(o.value.to_sat()));
        let original_fee = input_total.checked_sub(output_total).ok_or_else(|| {
            WalletError::TransactionNotFound(format!("{} spends less than it pays", self.txid))
        })?;
        let original_rate = original_fee as f64 / original.vsize() as f64;
        if (self.fee_rate as f64) <= original_rate {
            return Err(WalletError::InvalidFeeRate(format!(
                "{} sat/vB does not exceed the current {:.2} sat/vB",
                self.fee_rate, original_rate
            )));
        }

        let mut kept = Vec::new();
        let mut change_script = None;
        for output in &original.output {
            match snapshot.spks.lookup(&output.script_pubkey) {
                Some((Keychain::Internal, index)) if change_script.is_none() => change_script = Some(index),
                _ => kept.push(output.clone()),
            }
        }
        let change_index = change_script.unwrap_or_else(|| snapshot.next_change_index());
        let change = wallet.descriptor(Keychain::Internal).derive(change_index)?;

        let doomed = descendants(&snapshot, self.txid);
        let candidates: Vec<LocalUtxo> = snapshot
            .unspent()
            .into_iter()
            .filter(|u| !doomed.contains(&u.outpoint.txid))
            .collect();

        let sizes: Vec<u64> = kept.iter().map(|o| coin_selection::output_size(&o.script_pubkey)).collect();
        let target = Target {
            amount: kept.iter().fold(0u64, |sum, o| sum.saturating_add(o.value.to_sat())),
            output_sizes: &sizes,
            change_script: &change.script_pubkey,
        };
        let selection = coin_selection::select(
            required,
            candidates,
            &target,
            FeePolicy::replacing(rate, original_fee),
            Strategy::LargestFirst,
        )?;
        tracing::info!(
            original = %self.txid,
            original_fee,
            new_fee = selection.fee,
            inputs = selection.inputs.len(),
            "built fee bump"
        );
        let change = selection.change.map(|value| (value, &change));
        build_psbt(wallet, &snapshot, &selection.inputs, kept, change, Sequence::ENABLE_RBF_NO_LOCKTIME)
    }
}

/// `txid` plus every unconfirmed transaction that spends from it.
fn descendants(state: &WalletState, txid: Txid) -> HashSet<Txid> {
    let mut found = HashSet::from([txid]);
    let mut grew = true;
    while grew {
        grew = false;
        for (id, stored) in &state.txs {
            if !found.contains(id) && stored.tx.input.iter().any(|i| found.contains(&i.previous_output.txid)) {
                found.insert(*id);
                grew = true;
            }
        }
    }
    found
}

fn log_selection(selection: &Selection, amount: u64) {
    tracing::debug!(
        inputs = selection.inputs.len(),
        input_total = selection.input_total(),
        amount,
        fee = selection.fee,
        change = ?selection.change,
        "coin selection done"
    );
}

fn build_psbt(
    wallet: &Wallet,
    snapshot: &WalletState,
    inputs: &[LocalUtxo],
    mut outputs: Vec<TxOut>,
    change: Option<(u64, &DerivedAddress)>,
    sequence: Sequence,
) -> Result<Psbt> {
    if let Some((value, derived)) = change {
        outputs.push(TxOut { value: Amount::from_sat(value), script_pubkey: derived.script_pubkey.clone() });
    }
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|utxo| TxIn { previous_output: utxo.outpoint, sequence, ..Default::default() })
            .collect(),
        output: outputs,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| WalletError::InvalidBuilderState(e.to_string()))?;

    for (input, utxo) in psbt.inputs.iter_mut().zip(inputs) {
        let derived = wallet.descriptor(utxo.keychain).derive(utxo.index)?;
        input.witness_utxo = Some(utxo.txout.clone());
        input.non_witness_utxo = snapshot.txs.get(&utxo.outpoint.txid).map(|stored| stored.tx.as_ref().clone());
        input.bip32_derivation.insert(derived.public_key, derived.key_source);
    }
    if let (Some((_, derived)), Some(output)) = (change, psbt.outputs.last_mut()) {
        output.bip32_derivation.insert(derived.public_key, derived.key_source.clone());
    }
    Ok(psbt)
}
