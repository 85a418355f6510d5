//! Coin selection and fee arithmetic.
//!
//! Branch-and-bound looks for an input set that pays the target exactly,
//! give or take the cost of a change output. When none exists within
//! [`BNB_TRIES`] steps, or when inputs are forced (fee bumps), selection
//! falls back to largest-first and adds change if it is above dust.

use super::types::LocalUtxo;
use crate::error::{Result, WalletError};
use bitcoin::{Amount, FeeRate, Script};

pub const BNB_TRIES: usize = 100_000;

/// P2WPKH input: 41 non-witness bytes plus a 109 byte witness upper bound.
pub const INPUT_WEIGHT: u64 = 41 * 4 + 109;

/// Segwit marker and flag.
const SEGWIT_OVERHEAD: u64 = 2;

pub fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Serialized size of an output paying to `script`.
pub fn output_size(script: &Script) -> u64 {
    let len = script.len() as u64;
    8 + varint_len(len) + len
}

pub fn dust_limit(script: &Script) -> u64 { script.minimal_non_dust().to_sat() }

/// Weight of a transaction with `n_inputs` P2WPKH inputs and the given outputs.
pub fn tx_weight(n_inputs: usize, output_sizes: &[u64]) -> u64 {
    let outputs: u64 = output_sizes.iter().sum();
    let base = 4 + 4 + varint_len(n_inputs as u64) + varint_len(output_sizes.len() as u64) + outputs;
    base * 4 + SEGWIT_OVERHEAD + n_inputs as u64 * INPUT_WEIGHT
}

/// Highest accepted rate in sat/vB. A 1-in 1-out payment at this rate costs
/// about 1.1 BTC in fees.
pub const MAX_FEE_RATE: f32 = 1_000_000.0;

/// sat/vB as the user types it → sat/kwu, rounding up.
pub fn fee_rate_from_sat_per_vb(rate: f32) -> Result<FeeRate> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(WalletError::InvalidFeeRate(format!("{rate} sat/vB must be a positive number")));
    }
    if rate > MAX_FEE_RATE {
        return Err(WalletError::InvalidFeeRate(format!(
            "{rate} sat/vB is above the {MAX_FEE_RATE} sat/vB limit"
        )));
    }
    let kwu = (rate as f64 * 250.0).ceil() as u64;
    Ok(FeeRate::from_sat_per_kwu(kwu))
}

/// Saturates instead of wrapping; an absurd fee then fails selection.
pub fn fee_for_weight(rate: FeeRate, weight: u64) -> u64 {
    weight.saturating_mul(rate.to_sat_per_kwu()).div_ceil(1000)
}

/// Fee rule for a transaction. A replacement must also pay the replaced fee
/// plus 1 sat/vB of its own size.
#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    pub rate: FeeRate,
    pub replaced_fee: Option<u64>,
}

impl FeePolicy {
    pub fn new(rate: FeeRate) -> Self { Self { rate, replaced_fee: None } }

    pub fn replacing(rate: FeeRate, replaced_fee: u64) -> Self { Self { rate, replaced_fee: Some(replaced_fee) } }

    pub fn fee(&self, weight: u64) -> u64 {
        let by_rate = fee_for_weight(self.rate, weight);
        match self.replaced_fee {
            Some(old) => by_rate.max(old.saturating_add(weight.div_ceil(4))),
            None => by_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    BranchAndBound,
    LargestFirst,
}

/// What to pay: fixed outputs plus an optional change output.
#[derive(Debug, Clone)]
pub struct Target<'a> {
    /// Sum of the fixed outputs.
    pub amount: u64,
    pub output_sizes: &'a [u64],
    pub change_script: &'a Script,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<LocalUtxo>,
    pub fee: u64,
    pub change: Option<u64>,
}

impl Selection {
    pub fn input_total(&self) -> u64 { total_value(&self.inputs) }
}

pub fn select(
    required: Vec<LocalUtxo>,
    mut candidates: Vec<LocalUtxo>,
    target: &Target<'_>,
    policy: FeePolicy,
    strategy: Strategy,
) -> Result<Selection> {
    candidates.sort_by(|a, b| b.value().cmp(&a.value()).then(a.outpoint.cmp(&b.outpoint)));

    if strategy == Strategy::BranchAndBound && required.is_empty() && policy.replaced_fee.is_none() {
        if let Some(selection) = branch_and_bound(&candidates, target, policy.rate) {
            tracing::debug!(inputs = selection.inputs.len(), fee = selection.fee, "branch and bound found changeless match");
            return Ok(selection);
        }
    }
    largest_first(required, candidates, target, policy)
}

/// Sum of `utxos`, saturating at `u64::MAX`.
pub fn total_value<'a>(utxos: impl IntoIterator<Item = &'a LocalUtxo>) -> u64 {
    utxos.into_iter().fold(0u64, |sum, u| sum.saturating_add(u.value()))
}

fn largest_first(
    required: Vec<LocalUtxo>,
    candidates: Vec<LocalUtxo>,
    target: &Target<'_>,
    policy: FeePolicy,
) -> Result<Selection> {
    let available = total_value(required.iter().chain(candidates.iter()));
    let mut inputs = required;
    let mut pool = candidates.into_iter();

    let fee = loop {
        let fee = policy.fee(tx_weight(inputs.len(), target.output_sizes));
        let needed = target.amount.saturating_add(fee);
        if !inputs.is_empty() && total_value(&inputs) >= needed {
            break fee;
        }
        match pool.next() {
            Some(utxo) => inputs.push(utxo),
            None => return Err(WalletError::InsufficientFunds { needed, available }),
        }
    };

    let total = total_value(&inputs);
    let mut with_change = target.output_sizes.to_vec();
    with_change.push(output_size(target.change_script));
    let fee_with_change = policy.fee(tx_weight(inputs.len(), &with_change));
    let dust = dust_limit(target.change_script);

    let selection = match total.checked_sub(target.amount.saturating_add(fee_with_change)) {
        Some(change) if change >= dust => Selection { inputs, fee: fee_with_change, change: Some(change) },
        _ => Selection { fee: total - target.amount, inputs, change: None },
    };
    tracing::debug!(
        inputs = selection.inputs.len(),
        fee = selection.fee,
        change = ?selection.change,
        min_fee = fee,
        "largest-first selection"
    );
    Ok(selection)
}

fn branch_and_bound(candidates: &[LocalUtxo], target: &Target<'_>, rate: FeeRate) -> Option<Selection> {
    // Values are bounded by MAX_MONEY and rates by MAX_FEE_RATE, so the
    // search runs in i64. Anything outside that goes to largest-first.
    let max = Amount::MAX_MONEY.to_sat();
    if target.amount > max || total_value(candidates) > max {
        return None;
    }
    let input_fee = fee_for_weight(rate, INPUT_WEIGHT) as i64;
    let pool: Vec<(i64, &LocalUtxo)> = candidates
        .iter()
        .map(|u| (u.value() as i64 - input_fee, u))
        .filter(|(effective, _)| *effective > 0)
        .collect();

    let base_fee = fee_for_weight(rate, tx_weight(0, target.output_sizes)) as i64;
    let goal = target.amount as i64 + base_fee;
    let cost_of_change = fee_for_weight(rate, output_size(target.change_script) * 4) as i64 + input_fee;

    let mut available: i64 = pool.iter().map(|(e, _)| e).sum();
    if available < goal {
        return None;
    }

    let mut index = 0usize;
    let mut value = 0i64;
    let mut chosen: Vec<usize> = Vec::new();
    let mut best: Option<(i64, Vec<usize>)> = None;

    for _ in 0..BNB_TRIES {
        let mut backtrack = false;
        if value + available < goal || value > goal + cost_of_change {
            backtrack = true;
        } else if value >= goal {
            let waste = value - goal;
            if best.as_ref().map_or(true, |(w, _)| waste < *w) {
                best = Some((waste, chosen.clone()));
            }
            if waste == 0 {
                break;
            }
            backtrack = true;
        }

        if backtrack {
            let Some(last) = chosen.pop() else { break };
            for (effective, _) in &pool[last + 1..index] {
                available += effective;
            }
            value -= pool[last].0;
            index = last + 1;
        } else {
            let effective = pool[index].0;
            available -= effective;
            // Excluding an equal predecessor already explored this branch.
            let duplicate =
                index > 0 && !chosen.last().is_some_and(|&l| l + 1 == index) && pool[index - 1].0 == effective;
            if !duplicate {
                chosen.push(index);
                value += effective;
            }
            index += 1;
        }
    }

    let (_, picked) = best?;
    let inputs: Vec<LocalUtxo> = picked.into_iter().map(|i| pool[i].1.clone()).collect();
    let total = total_value(&inputs);
    Some(Selection { fee: total - target.amount, inputs, change: None })
}
