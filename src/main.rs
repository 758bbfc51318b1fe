//! Pool Admin - operator pipeline for deployed mining pool contracts
//!
//! Resolves a contract by name or address, encodes a state-changing call,
//! estimates it, signs it with a locally held key, broadcasts it and waits for
//! inclusion, then reads the affected state back.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::abi::Token;
use ethers::types::U256;
use std::path::PathBuf;
use tracing::{error, info, warn};

mod chain;
mod config;
mod contract;
mod error;
mod metrics;
mod pipeline;
mod tx;

#[cfg(test)]
mod testing;

use chain::{ChainProvider, InclusionStatus};
use config::{Settings, CONFIG_ENV};
use contract::{encoder, AddressBook, ContractRef, NamedValue};
use error::PipelineError;
use pipeline::{Accessor, CallReport, ContractCall, Pipeline};
use tx::SigningKey;

const DEFAULT_POOL_TYPE: &str = "MiningFixRangeBoostVeiZi";

#[derive(Debug, Parser)]
#[command(name = "pool-admin", version, about = "Reconfigure deployed mining pool contracts")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Network to operate on
    #[arg(long, global = true, env = "POOL_ADMIN_NETWORK")]
    network: Option<String>,

    /// Stop after estimation; nothing is signed or sent
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Sign with the key in this environment variable instead of the network's
    #[arg(long, global = true)]
    key_env: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Write Prometheus text exposition here after the run
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Change the per-block emission of one reward token of a pool
    ModifyRewardPerBlock {
        /// Pool name from the address table, or a 0x address
        pool: String,
        reward_idx: u64,
        /// Amount in whole tokens, e.g. 0.1
        amount: String,
        /// Decimals of the reward token; the amount is sent as amount * 10^decimals
        decimals: u32,
        #[arg(long, default_value = DEFAULT_POOL_TYPE)]
        contract_type: String,
    },
    /// Send any state-changing call
    Call {
        contract: String,
        /// Method name, or a full signature such as `f(uint256,address)`
        method: String,
        args: Vec<String>,
        #[arg(long, default_value = DEFAULT_POOL_TYPE)]
        contract_type: String,
        /// Zero-argument view method to read before and after the call
        #[arg(long)]
        read_back: Option<String>,
    },
    /// Call a read-only method
    Read {
        contract: String,
        method: String,
        args: Vec<String>,
        #[arg(long, default_value = DEFAULT_POOL_TYPE)]
        contract_type: String,
    },
    /// Print the address a contract reference resolves to
    Resolve { contract: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_json);

    let result = run(&cli).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics: {:#}", e);
        }
    }
    if let Err(e) = result {
        error!("{:#}", e);
        if e
            .downcast_ref::<PipelineError>()
            .map_or(false, PipelineError::reached_network)
        {
            warn!("The transaction was broadcast and may still be mined; check it before resending");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let network = cli
        .network
        .as_deref()
        .context("No network selected. Pass --network or set POOL_ADMIN_NETWORK")?;

    info!(
        "pool-admin v{} on network {}",
        env!("CARGO_PKG_VERSION"),
        network
    );

    match &cli.command {
        Command::Resolve { contract } => {
            let book = AddressBook::from_tables(settings.address_tables())?;
            let address = book.resolve_identifier(contract, network)?;
            println!("{:?}", address);
            Ok(())
        }
        Command::Read {
            contract,
            method,
            args,
            contract_type,
        } => {
            let pipeline = Pipeline::connect(&settings, network)?;
            let reference: ContractRef = contract.parse()?;
            let args = pipeline.tokenize(contract_type, method, args)?;
            let values = pipeline
                .read(&reference, contract_type, method, &args)
                .await?;
            print_values(&values, cli.json)
        }
        Command::ModifyRewardPerBlock {
            pool,
            reward_idx,
            amount,
            decimals,
            contract_type,
        } => {
            let method = "modifyRewardPerBlock";
            let scaled = encoder::scale_decimal(amount, *decimals).map_err(|message| {
                PipelineError::Encoding {
                    method: method.to_string(),
                    message,
                }
            })?;
            let reward_idx = Token::Uint(U256::from(*reward_idx));

            let call = ContractCall {
                contract: pool.parse()?,
                contract_type: contract_type.clone(),
                method: method.to_string(),
                args: vec![reward_idx.clone(), Token::Uint(scaled)],
                accessor: Some(Accessor {
                    method: "rewardInfos".to_string(),
                    args: vec![reward_idx],
                }),
                owner_accessor: Some("owner".to_string()),
            };
            let pipeline = Pipeline::connect(&settings, network)?;
            execute(cli, &settings, network, &pipeline, call).await
        }
        Command::Call {
            contract,
            method,
            args,
            contract_type,
            read_back,
        } => {
            let pipeline = Pipeline::connect(&settings, network)?;
            let call = ContractCall {
                contract: contract.parse()?,
                contract_type: contract_type.clone(),
                method: method.clone(),
                args: pipeline.tokenize(contract_type, method, args)?,
                accessor: read_back.as_ref().map(|method| Accessor {
                    method: method.clone(),
                    args: Vec::new(),
                }),
                owner_accessor: None,
            };
            execute(cli, &settings, network, &pipeline, call).await
        }
    }
}

async fn execute(
    cli: &Cli,
    settings: &Settings,
    network: &str,
    pipeline: &Pipeline<ChainProvider>,
    call: ContractCall,
) -> Result<()> {
    let key_env = match &cli.key_env {
        Some(var) => var.as_str(),
        None => settings.network(network)?.private_key_env.as_str(),
    };
    let key = SigningKey::from_env(key_env)?;
    let report = pipeline.execute(&call, &key, cli.dry_run).await?;
    print_report(&report, cli.json)?;

    match report.submission.as_ref().map(|s| &s.status) {
        None | Some(InclusionStatus::Included(_)) => Ok(()),
        Some(InclusionStatus::Rejected(receipt)) => {
            anyhow::bail!("Transaction {:?} reverted on chain", receipt.tx_hash)
        }
        Some(InclusionStatus::TimedOut { tx_hash, waited }) => Err(PipelineError::PendingTimeout {
            tx_hash: format!("{:?}", tx_hash),
            waited: *waited,
        }
        .into()),
        Some(InclusionStatus::Unresolved { tx_hash, error, .. }) => {
            Err(PipelineError::Unconfirmed {
                tx_hash: format!("{:?}", tx_hash),
                message: error.clone(),
            }
            .into())
        }
    }
}

fn print_report(report: &CallReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn print_values(values: &[NamedValue], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(values)?);
    } else {
        for value in values {
            println!("{}", value);
        }
    }
    Ok(())
}

fn init_logging(json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pool_admin=debug,hyper=warn"));

    // Logs go to stderr; stdout carries the report
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
