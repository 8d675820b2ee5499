//! tron-relayer
//!
//! Runs a transaction manager against a TRON full node. `run` keeps the
//! manager alive for other processes to observe through the metrics
//! endpoint; `send` submits one contract call and waits for its outcome.
//!
//! Signing keys come from `TRON_PRIVATE_KEYS` (comma separated hex).

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tron_relayer::logging::init_logging;
use tron_relayer::{
    HttpClientConfig, HttpFullNodeClient, LocalKeystore, TransactionStatus, TronAddress,
    TronTxmConfig, TxRequest, Txm, TxmBuilder,
};

mod endpoints;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Full node base URL
    #[arg(long, env = "TRON_FULL_NODE_URL", default_value = "https://api.trongrid.io")]
    node: String,

    /// Solidity node base URL (defaults to the full node)
    #[arg(long, env = "TRON_SOLIDITY_NODE_URL")]
    solidity_node: Option<String>,

    /// TronGrid API key
    #[arg(long, env = "TRON_PRO_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Metrics port
    #[arg(long, default_value = "9090")]
    metrics_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the manager and keep it running until Ctrl-C
    Run,
    /// Submit one contract call and wait for a terminal status
    Send {
        /// Sender address (base58)
        #[arg(long)]
        from: String,
        /// Contract address (base58)
        #[arg(long)]
        contract: String,
        /// Method signature, e.g. `transfer(address,uint256)`
        #[arg(long)]
        method: String,
        /// Parameters as a JSON array of alternating type/value entries
        #[arg(long, default_value = "[]")]
        params: String,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting tron-relayer");

    let config = load_config(&args.config)?;
    let txm = Arc::new(build_txm(&args, config)?);
    txm.start().context("Failed to start transaction manager")?;

    let metrics_port = args.metrics_port;
    let server = tokio::spawn(endpoints::endpoint_server(metrics_port, txm.clone()));

    let outcome = match args.command {
        Command::Run => run(&txm).await,
        Command::Send {
            from,
            contract,
            method,
            params,
            timeout_secs,
        } => {
            send(
                &txm,
                &from,
                &contract,
                &method,
                &params,
                Duration::from_secs(timeout_secs),
            )
            .await
        }
    };

    txm.close().await;
    server.abort();
    info!("Shut down");
    outcome
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<TronTxmConfig> {
    if std::path::Path::new(path).exists() {
        TronTxmConfig::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!(path, "Config file not found, using defaults");
        let mut config = TronTxmConfig::default();
        dotenvy::dotenv().ok();
        config
            .apply_env_overrides(std::env::vars())
            .context("Invalid environment override")?;
        Ok(config)
    }
}

fn build_txm(args: &Args, config: TronTxmConfig) -> Result<Txm> {
    let mut http = HttpClientConfig::new(args.node.clone());
    http.solidity_node_url = args.solidity_node.clone();
    http.api_key = args.api_key.clone();
    let client = HttpFullNodeClient::new(&http).context("Failed to build node client")?;

    let keys = std::env::var("TRON_PRIVATE_KEYS").unwrap_or_default();
    let keystore = LocalKeystore::from_hex_keys(keys.split(','))
        .context("Failed to load TRON_PRIVATE_KEYS")?;

    TxmBuilder::new(config, Arc::new(client), Arc::new(keystore))
        .name("tron-relayer")
        .build()
        .context("Failed to build transaction manager")
}

async fn run(txm: &Txm) -> Result<()> {
    let mut stats_interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let (queued, unconfirmed) = txm.inflight_count();
                info!(queued, unconfirmed, "Inflight transactions");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
        }
    }
}

async fn send(
    txm: &Txm,
    from: &str,
    contract: &str,
    method: &str,
    params: &str,
    timeout: Duration,
) -> Result<()> {
    let from: TronAddress = from.parse().context("Invalid --from address")?;
    let contract: TronAddress = contract.parse().context("Invalid --contract address")?;
    let params: Vec<serde_json::Value> =
        serde_json::from_str(params).context("--params must be a JSON array")?;

    let request = TxRequest::new(from, contract, method).with_params(params);
    let id = txm.enqueue(request).await.context("Enqueue rejected")?;
    info!(tx_id = %id, "Transaction enqueued");

    let deadline = tokio::time::Instant::now() + timeout;
    let mut poll = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = poll.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!(tx_id = %id, "Interrupted before a terminal status");
                return Ok(());
            }
        }
        match txm.get_transaction_status(&id) {
            TransactionStatus::Finalized => {
                let hashes = txm
                    .account_store()
                    .find(&id)
                    .map(|store| store.get_hashes(&id))
                    .unwrap_or_default();
                info!(tx_id = %id, hashes = ?hashes, "Transaction finalized");
                return Ok(());
            }
            TransactionStatus::Fatal => {
                error!(tx_id = %id, "Transaction failed");
                anyhow::bail!("transaction {id} failed");
            }
            _ if tokio::time::Instant::now() >= deadline => {
                anyhow::bail!("timed out waiting for transaction {id}");
            }
            _ => {}
        }
    }
}
