//! greendata CLI
//!
//! Lists, searches, creates and reveals confidential energy records.
//!
//! Usage:
//!   greendata --contract 0x... list
//!   greendata --contract 0x... create --name "Plant A" --consumption 1200
//!   GREENDATA_PRIVATE_KEY=0x... greendata --contract 0x... reveal energy-...

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_signer_local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use greendata_client::{
    CryptoGateway, EvmLedger, LedgerClient, LifecycleController, RelayerCapability, StatusKind,
};
use greendata_core::query::{clamp_page, page_count, paginate};
use greendata_core::{Address, ClientConfig, ImpactEstimate, PendingDraft, Record, RecordId};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "greendata")]
#[command(about = "Confidential energy records: encrypted submission and verified disclosure")]
struct Args {
    /// JSON config file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger JSON-RPC endpoint
    #[arg(long, env = "GREENDATA_RPC_URL")]
    rpc_url: Option<String>,

    /// FHE relayer endpoint
    #[arg(long, env = "GREENDATA_RELAYER_URL")]
    relayer_url: Option<String>,

    /// Records contract address
    #[arg(long, env = "GREENDATA_CONTRACT")]
    contract: Option<Address>,

    /// Signing key; without one the client is read-only
    #[arg(long, env = "GREENDATA_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List records, one page at a time
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Aggregate statistics
    Stats,
    /// Case-insensitive search on name or description
    Search {
        term: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Show one record
    Show { id: RecordId },
    /// Encrypt and submit a new record
    Create {
        #[arg(long)]
        name: String,
        /// Digits only; anything else is stripped
        #[arg(long)]
        consumption: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Disclose a record's consumption with an on-chain proof
    Reveal { id: RecordId },
    /// Check that the records contract answers
    Available,
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &args.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(url) = &args.relayer_url {
        config.relayer_url = url.clone();
    }
    if let Some(contract) = args.contract {
        config.contract_address = Some(contract);
    }
    config.validate()?;
    Ok(config)
}

fn connect(args: &Args, config: &ClientConfig) -> Result<Arc<dyn LedgerClient>> {
    let Some(contract) = config.contract_address else {
        bail!("no contract address: pass --contract or set GREENDATA_CONTRACT");
    };

    let ledger = match &args.private_key {
        Some(key) => {
            let signer: PrivateKeySigner = key.parse().context("invalid private key")?;
            tracing::info!(account = %signer.address(), "Signing enabled");
            EvmLedger::with_signer(&config.rpc_url, contract, signer)?
        }
        None => {
            tracing::info!("No private key, running read-only");
            EvmLedger::read_only(&config.rpc_url, contract)?
        }
    };

    let ledger: Arc<dyn LedgerClient> = Arc::new(ledger.with_confirmation_policy(
        Duration::from_millis(config.confirmation_poll_ms),
        Duration::from_secs(config.confirmation_timeout_secs),
    ));
    Ok(ledger)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn print_page(controller: &LifecycleController, records: &[&Record], page: usize) {
    let page_size = controller.config().page_size;
    let pages = page_count(records.len(), page_size);
    let page = clamp_page(page, pages);

    for record in paginate(records, page_size, page) {
        let value = controller
            .repository()
            .display_value(&record.id)
            .map(|v| v.to_string())
            .unwrap_or_default();
        println!(
            "{:<32} {:<24} {:>10} kWh  tax {:>8}  {}",
            record.id, record.name, record.public_value1, record.public_value2, value
        );
    }
    println!("page {} of {} ({} records)", page, pages, records.len());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "greendata=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let ledger = connect(&args, &config)?;
    let crypto = CryptoGateway::new(Arc::new(RelayerCapability::new(&config.relayer_url)));
    let controller = LifecycleController::new(ledger, crypto, config)?;

    let mut events = controller.status().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                StatusKind::Error => tracing::error!(status = %event.message),
                _ => tracing::info!(status = %event.message),
            }
        }
    });

    match args.command {
        Command::List { page } => {
            controller.refresh().await?;
            let snapshot = controller.repository().snapshot();
            let records: Vec<&Record> = snapshot.records().iter().collect();
            print_page(&controller, &records, page);
        }
        Command::Stats => {
            controller.refresh().await?;
            let stats = controller
                .repository()
                .snapshot()
                .stats(now_secs(), controller.config().recent_window_secs);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search { term, page } => {
            controller.refresh().await?;
            let snapshot = controller.repository().snapshot();
            print_page(&controller, &snapshot.search(&term), page);
        }
        Command::Show { id } => {
            controller.refresh().await?;
            let snapshot = controller.repository().snapshot();
            let Some(record) = snapshot.get(&id) else {
                bail!("record {} not found", id);
            };
            println!("{}", serde_json::to_string_pretty(record)?);
            if let Some(value) = record.verification.plaintext() {
                let impact = ImpactEstimate::from_disclosed(value, record.public_value1);
                println!("{}", serde_json::to_string_pretty(&impact)?);
            }
        }
        Command::Create {
            name,
            consumption,
            description,
        } => {
            controller.initialize_crypto().await?;
            let draft = PendingDraft::new(
                name,
                PendingDraft::sanitize_consumption(&consumption),
                description,
            );
            let receipt = controller.create(&draft).await?;
            println!(
                "created {} in tx {} (carbon tax {})",
                receipt.id, receipt.tx, receipt.carbon_tax
            );
        }
        Command::Reveal { id } => {
            controller.initialize_crypto().await?;
            let outcome = controller.reveal(&id).await?;
            let display = controller.repository().display_value(&id);
            let shown = display
                .map(|v| v.to_string())
                .unwrap_or_else(|| outcome.plaintext().to_string());
            println!("{}: {}", id, shown);
            if let Some(record) = controller.repository().snapshot().get(&id) {
                let impact =
                    ImpactEstimate::from_disclosed(outcome.plaintext(), record.public_value1);
                println!("{}", serde_json::to_string_pretty(&impact)?);
            }
        }
        Command::Available => {
            if !controller.check_availability().await? {
                bail!("contract reported unavailable");
            }
            println!("available");
        }
    }

    Ok(())
}
