// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # KMS Signer
//!
//! Operator CLI for the KMS-backed transaction signer. Results are printed
//! to stdout as JSON, logs go to stderr.

use std::process::ExitCode;

use alloy::primitives::{Address, B256};
use clap::{Parser, Subcommand};
use kms_signer::{
    blockchain::{amount::from_base_units, TransferIntent},
    config::{KeyConfig, SignerConfig, LOG_FORMAT_ENV},
    error::TransferError,
    state::{verify_key, SignerContext},
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Sign and broadcast token transfers with a key held in AWS KMS.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the address behind the KMS key and check it can sign.
    ///
    /// Only needs the KMS settings, so it can be used to discover the
    /// value for SIGNER_ADDRESS.
    Verify,
    #[command(flatten)]
    Chain(ChainCommand),
}

/// Commands that need the node and token contract.
#[derive(Debug, Subcommand)]
enum ChainCommand {
    /// Show confirmed, pending and local nonce state.
    Nonce,
    /// Show token and native balances of the signer.
    Balance,
    /// Transfer tokens. Only simulates unless --confirm is given.
    Transfer {
        /// Recipient address (0x + 40 hex chars)
        #[arg(long)]
        recipient: String,
        /// Amount in token units (e.g. "10.5")
        #[arg(long)]
        amount: String,
        /// Purpose tag recorded with the transfer
        #[arg(long, default_value = "manual")]
        purpose: String,
        /// Sign and broadcast
        #[arg(long)]
        confirm: bool,
    },
    /// Look up a transaction receipt.
    Receipt {
        #[arg(long, value_name = "HASH")]
        tx_hash: B256,
    },
    /// Replace a stuck pending nonce with a zero-value self-transfer.
    ReplaceNonce {
        #[arg(long)]
        nonce: u64,
        /// Sign and broadcast
        #[arg(long)]
        confirm: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => error!(error = %e, "Failed to serialize output"),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

async fn verify() -> ExitCode {
    let config = match KeyConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(2);
        }
    };

    match verify_key(&config).await {
        Ok(report) => {
            print_json(&report);
            if report.matches_config == Some(false) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!(kind = %e.kind, error = %e.message, "Key verification failed");
            print_json(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: ChainCommand, context: SignerContext) -> Result<(), TransferError> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let address = context.identity.address;

    match command {
        ChainCommand::Nonce => {
            let snapshot = context.nonces.snapshot(address).await?;
            print_json(&snapshot);
        }
        ChainCommand::Balance => {
            let raw = context
                .token
                .balance_of(context.node.as_ref(), address)
                .await?;
            let native = context.node.balance(address).await?;
            let symbol = context.token.symbol(context.node.as_ref()).await;
            print_json(&json!({
                "address": address,
                "token": context.token.address,
                "symbol": symbol,
                "balance": from_base_units(raw, context.token.decimals).ok(),
                "balance_raw": raw,
                "native_balance_wei": native,
            }));
        }
        ChainCommand::Transfer {
            recipient,
            amount,
            purpose,
            confirm,
        } => {
            if !confirm {
                let simulated = context
                    .builder
                    .simulate_transfer(&recipient, &amount)
                    .await?;
                print_json(&json!({
                    "simulated": true,
                    "from": address,
                    "to": simulated.beneficiary,
                    "amount_raw": simulated.amount,
                    "gas_limit": simulated.gas_limit,
                    "max_fee_per_gas": simulated.fees.max_fee_per_gas().to_string(),
                }));
                info!("Simulation only, pass --confirm to broadcast");
                return Ok(());
            }

            let intent = TransferIntent::new(recipient, amount, purpose);
            let result = context.transfer_service().transfer(&intent, &cancel).await?;
            print_json(&result);
        }
        ChainCommand::Receipt { tx_hash } => {
            let receipt = context.tracker.receipt(tx_hash).await?;
            print_json(&match receipt {
                Some(r) => json!({
                    "tx_hash": r.tx_hash,
                    "status": if r.success { "success" } else { "reverted" },
                    "gas_used": r.gas_used,
                    "block_number": r.block_number,
                    "effective_gas_price": r.effective_gas_price.to_string(),
                    "explorer_url": context.network.tx_url(&r.tx_hash),
                }),
                None => json!({ "tx_hash": tx_hash, "status": "pending_or_unknown" }),
            });
        }
        ChainCommand::ReplaceNonce { nonce, confirm } => {
            if !confirm {
                let snapshot = context.nonces.snapshot(address).await?;
                print_json(&json!({
                    "nonce": nonce,
                    "replaceable": nonce >= snapshot.latest && nonce < snapshot.pending,
                    "snapshot": snapshot,
                }));
                info!("Dry run, pass --confirm to broadcast the replacement");
                return Ok(());
            }

            let result = context
                .transfer_service()
                .replace_nonce(nonce, &cancel)
                .await?;
            print_json(&result);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let command = match cli.command {
        Command::Verify => return verify().await,
        Command::Chain(command) => command,
    };

    let context = match SignerConfig::from_env() {
        Ok(config) => SignerContext::initialize(config).await,
        Err(e) => Err(e),
    };
    let context = match context {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(2);
        }
    };

    let signer: Address = context.identity.address;
    match run(command, context).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(signer = %signer, kind = %e.kind, error = %e.message, "Command failed");
            print_json(&e);
            ExitCode::FAILURE
        }
    }
}
