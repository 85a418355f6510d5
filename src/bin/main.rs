//! Satchel CLI - JSON in, JSON out.
//!
//!   satchel create [--words 12|24]      → {"mnemonic", "address", ...}
//!   satchel restore <words...>          → {"address", ...}
//!   satchel sync                        → {"tip_height", "transactions", ...}
//!   satchel balance                     → {"confirmed", "unconfirmed", "total"}
//!   satchel send <address> <sat> --fee-rate 2 --rbf
//!
//! Configuration comes from flags, then `SATCHEL_*` env vars (a `.env` file in
//! the working directory is loaded first), then defaults.

use anyhow::{anyhow, bail, Context};
use bitcoin::Txid;
use satchel::logging::init_logging;
use satchel::{
    Balance, FileStore, Network, Recipient, SyncProgress, TransactionDetails, WalletConfig, WalletContext,
    WalletError, WordCount,
};
use serde_json::{json, Value};
use std::env;
use std::io::IsTerminal;
use std::sync::Arc;

fn main() {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }
    if opts.version {
        println!("satchel {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("create") => cmd_create(&opts),
        Some("restore") => cmd_restore(&opts),
        Some("address") => cmd_address(&opts),
        Some("balance") => cmd_balance(&opts),
        Some("sync") => cmd_sync(&opts),
        Some("transactions") | Some("txs") => cmd_transactions(&opts),
        Some("tx") => cmd_tx(&opts),
        Some("send") => cmd_send(&opts),
        Some("drain") => cmd_drain(&opts),
        Some("bump") => cmd_bump(&opts),
        Some("endpoint") => cmd_endpoint(&opts),
        Some(cmd) => Err(anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = opts.pretty || std::io::stdout().is_terminal();
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            let kind = e.downcast_ref::<WalletError>().map(|w| w.kind().as_str()).unwrap_or("usage");
            eprintln!("{}", render(&json!({"error": format!("{:#}", e), "kind": kind}), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    positional: Vec<String>,
    network: Option<String>,
    electrum_url: Option<String>,
    data_dir: Option<String>,
    mnemonic: Option<String>,
    words: Option<usize>,
    fee_rate: Option<f32>,
    rbf: bool,
    new: bool,
    pretty: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv();

        let mut opts = ParsedArgs::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            let value = args.get(i + 1).cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--pretty" => opts.pretty = true,
                "--rbf" => opts.rbf = true,
                "--new" => opts.new = true,
                "--network" | "-n" => {
                    opts.network = value;
                    i += 1;
                }
                "--electrum" | "-e" => {
                    opts.electrum_url = value;
                    i += 1;
                }
                "--data-dir" | "-d" => {
                    opts.data_dir = value;
                    i += 1;
                }
                "--mnemonic" | "-m" => {
                    opts.mnemonic = value;
                    i += 1;
                }
                "--words" => {
                    opts.words = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                "--fee-rate" | "-f" => {
                    opts.fee_rate = value.and_then(|v| v.parse().ok());
                    i += 1;
                }
                _ if !arg.starts_with('-') => opts.positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !opts.positional.is_empty() {
            opts.command = Some(opts.positional.remove(0));
        }
        opts
    }

    fn arg(&self, n: usize, what: &str) -> anyhow::Result<&str> {
        self.positional.get(n).map(String::as_str).ok_or_else(|| anyhow!("{} required", what))
    }

    fn fee_rate(&self) -> f32 { self.fee_rate.unwrap_or(satchel::wallet::tx_builder::DEFAULT_FEE_RATE) }
}

fn load_dotenv() {
    if let Ok(contents) = std::fs::read_to_string(".env") {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() && env::var(key.trim()).is_err() {
                    env::set_var(key.trim(), value);
                }
            }
        }
    }
}

fn print_usage() {
    println!(
        r#"satchel - BIP84 wallet over Electrum

USAGE:
    satchel <command> [args] [options]

COMMANDS:
    create [--words N]          Generate a new wallet (12 or 24 words)
    restore <words...>          Restore from a BIP39 mnemonic (or --mnemonic)
    address [--new]             Last unused receive address, or reveal a new one
    balance                     Confirmed and unconfirmed balance
    sync                        Scan the chain through Electrum
    transactions                Wallet transactions, newest first
    tx <txid>                   One transaction and its status
    send <address> <sat>        Pay an address (--fee-rate, --rbf)
    drain <address>             Sweep every output to an address
    bump <txid> --fee-rate R    Replace an unconfirmed RBF transaction
    endpoint                    Active Electrum endpoint

OPTIONS:
    --network, -n <net>         bitcoin|testnet|signet|regtest (env: SATCHEL_NETWORK)
    --electrum, -e <url>        Electrum URL (env: SATCHEL_ELECTRUM_URL)
    --data-dir, -d <path>       Data directory (env: SATCHEL_DATA_DIR)
    --fee-rate, -f <sat/vB>     Fee rate (default: 1.0)
    --pretty                    Pretty-print JSON
    --version, -V               Print version

EXAMPLES:
    satchel restore --network signet --mnemonic "abandon ... about"
    satchel sync --network signet
    satchel send tb1q... 25000 --fee-rate 3 --rbf
    satchel balance | jq .total
"#
    );
}

fn context(opts: &ParsedArgs) -> anyhow::Result<WalletContext> {
    let mut config = WalletConfig::from_env();
    if let Some(network) = &opts.network {
        config.network = network.parse::<Network>().map_err(|e| anyhow!(e))?;
    }
    if let Some(url) = &opts.electrum_url {
        config = config.with_electrum(url.clone());
    }
    if let Some(dir) = &opts.data_dir {
        config = config.with_data_dir(dir);
    }
    let store = FileStore::new(config.store_path());
    Ok(WalletContext::new(config, Arc::new(store)))
}

fn loaded(opts: &ParsedArgs) -> anyhow::Result<WalletContext> {
    let ctx = context(opts)?;
    ctx.load_wallet().context("no wallet here yet, run 'satchel create' or 'satchel restore'")?;
    Ok(ctx)
}

fn cmd_create(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words = match opts.words.unwrap_or(12) {
        12 => WordCount::Words12,
        15 => WordCount::Words15,
        18 => WordCount::Words18,
        21 => WordCount::Words21,
        24 => WordCount::Words24,
        n => bail!("unsupported word count {}", n),
    };
    let ctx = context(opts)?;
    ctx.create_wallet_with(words)?;
    let address = ctx.last_unused_address()?;
    Ok(json!({
        "status": "created",
        "network": ctx.config().network.as_str(),
        "mnemonic": ctx.mnemonic()?,
        "address": address.address.to_string(),
        "db": ctx.config().db_path(),
    }))
}

fn cmd_restore(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let words = match &opts.mnemonic {
        Some(words) => words.clone(),
        None if opts.positional.is_empty() => bail!("mnemonic required: satchel restore <words...>"),
        None => opts.positional.join(" "),
    };
    let ctx = context(opts)?;
    ctx.recover_wallet(&words)?;
    let address = ctx.last_unused_address()?;
    Ok(json!({
        "status": "restored",
        "network": ctx.config().network.as_str(),
        "address": address.address.to_string(),
        "db": ctx.config().db_path(),
    }))
}

fn cmd_address(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let ctx = loaded(opts)?;
    let info = if opts.new { ctx.new_address()? } else { ctx.last_unused_address()? };
    Ok(json!({"address": info.address.to_string(), "index": info.index}))
}

fn cmd_balance(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let ctx = loaded(opts)?;
    Ok(balance_json(&ctx.balance()?))
}

fn cmd_sync(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let ctx = loaded(opts)?;
    let progress = |p: SyncProgress| {
        tracing::debug!(percent = p.percent, message = p.message.as_deref().unwrap_or(""), "sync progress");
    };
    let summary = ctx.sync(&progress)?;
    Ok(json!({
        "tip_height": summary.tip_height,
        "transactions": summary.transactions,
        "new_transactions": summary.new_transactions,
        "url": summary.url,
        "balance": balance_json(&ctx.balance()?),
    }))
}

fn cmd_transactions(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let ctx = loaded(opts)?;
    let txs: Vec<Value> = ctx.transactions()?.iter().map(tx_json).collect();
    Ok(json!({"count": txs.len(), "transactions": txs}))
}

fn cmd_tx(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let txid = opts.arg(0, "txid")?.parse::<Txid>().context("invalid txid")?;
    let ctx = loaded(opts)?;
    let status = ctx.tx_status(&txid)?.ok_or_else(|| anyhow!(WalletError::TransactionNotFound(txid.to_string())))?;
    let mut out = ctx.transaction(&txid)?.map(|d| tx_json(&d)).unwrap_or_else(|| json!({"txid": txid.to_string()}));
    out["status"] = json!(format!("{:?}", status));
    Ok(out)
}

fn cmd_send(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let address = opts.arg(0, "address")?;
    let amount: u64 = opts.arg(1, "amount")?.parse().context("amount must be an integer in sat")?;
    let ctx = loaded(opts)?;
    let txid = ctx.send(&[Recipient::new(address, amount)], opts.fee_rate(), opts.rbf)?;
    Ok(json!({"txid": txid.to_string(), "to": address, "amount_sat": amount}))
}

fn cmd_drain(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let address = opts.arg(0, "address")?;
    let ctx = loaded(opts)?;
    let txid = ctx.drain(address, opts.fee_rate())?;
    Ok(json!({"txid": txid.to_string(), "to": address}))
}

fn cmd_bump(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let txid = opts.arg(0, "txid")?.parse::<Txid>().context("invalid txid")?;
    let fee_rate = opts.fee_rate.ok_or_else(|| anyhow!("--fee-rate required"))?;
    let ctx = loaded(opts)?;
    let replacement = ctx.bump_fee(txid, fee_rate)?;
    Ok(json!({"replaced": txid.to_string(), "txid": replacement.to_string(), "fee_rate": fee_rate}))
}

fn cmd_endpoint(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let ctx = context(opts)?;
    let last_synced = ctx.load_wallet().ok().and_then(|_| ctx.wallet().ok()).and_then(|w| w.last_synced_url());
    Ok(json!({
        "url": ctx.electrum().current_url(),
        "default": ctx.electrum().is_default(),
        "last_synced_url": last_synced,
    }))
}

fn balance_json(balance: &Balance) -> Value {
    json!({"confirmed": balance.confirmed, "unconfirmed": balance.unconfirmed, "total": balance.total()})
}

fn tx_json(details: &TransactionDetails) -> Value {
    let mut out = json!({
        "txid": details.txid().to_string(),
        "sent": details.sent(),
        "received": details.received(),
        "fee": details.fee(),
        "confirmed": details.is_confirmed(),
    });
    if let TransactionDetails::Confirmed { height, timestamp, .. } = details {
        out["height"] = json!(height);
        out["timestamp"] = json!(timestamp);
        out["time"] = json!(chrono::DateTime::from_timestamp(*timestamp as i64, 0).map(|t| t.to_rfc3339()));
    }
    out
}
