//! Operator tool: registration, balances, reconciliation and the audited
//! administrative mutations.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use serde_json::json;

use address_ledger::application::LedgerServices;
use address_ledger::config::AppConfig;
use address_ledger::domain::models::AuditCall;
use address_ledger::infrastructure::daemon::{DaemonClient, RpcDaemonClient};
use address_ledger::infrastructure::lock::{DatabaseLockService, LockService};
use address_ledger::infrastructure::persistence::{DbPool, RepositoryFactory};
use address_ledger::utils::logging;

/// Address ledger administration CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Network the addresses belong to (defaults to NETWORK)
    #[arg(long, global = true)]
    network: Option<String>,

    /// Identity recorded on audited operations
    #[arg(long, global = true, default_value = "ledger-admin")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        /// Number of migrations to run (all if not specified)
        #[arg(short, long)]
        steps: Option<u32>,
    },
    /// Start monitoring an address
    Register { address: String },
    /// Create a named account under an address
    CreateAccount { address: String, name: String },
    /// List monitored addresses
    Addresses,
    /// Print the balances of an address, or of one of its accounts
    Balances {
        address: String,
        #[arg(short, long)]
        account: Option<String>,
    },
    /// Compare balances with the daemon, correcting them with --apply
    ReconcileBalances {
        address: String,
        #[arg(long)]
        apply: bool,
        #[arg(long, default_value = "manual reconciliation")]
        reason: String,
    },
    /// Compare unspent outputs with the daemon, correcting them with --apply
    ReconcileUtxos {
        address: String,
        #[arg(long)]
        apply: bool,
        #[arg(long, default_value = "manual reconciliation")]
        reason: String,
    },
    /// Move confirmed funds between two accounts
    Transfer {
        address: String,
        from: String,
        to: String,
        asset: String,
        /// Base units
        amount: i64,
        #[arg(long, default_value = "manual transfer")]
        reason: String,
    },
    /// Move everything one transaction left in an account to another account
    TransferTxid {
        address: String,
        from: String,
        to: String,
        txid: String,
        #[arg(long, default_value = "manual transfer")]
        reason: String,
    },
    /// Close an account, moving its confirmed funds into another one
    Close {
        address: String,
        name: String,
        #[arg(long, default_value = "default")]
        into: String,
        #[arg(long, default_value = "account closed")]
        reason: String,
    },
    /// Collapse every account of an address into one
    Consolidate {
        address: String,
        #[arg(long, default_value = "default")]
        into: String,
        #[arg(long, default_value = "accounts consolidated")]
        reason: String,
    },
    /// Collapse confirmed history older than the retention window
    Prune {
        /// Overrides LEDGER_RETENTION_DAYS
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logger();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let network = cli.network.clone().unwrap_or_else(|| config.network.clone());

    let db_pool = DbPool::new(&config)
        .await
        .context("failed to connect to database")?;

    if let Commands::Migrate { steps } = cli.command {
        logging::log_info("Running database migrations...");
        Migrator::up(db_pool.get_connection(), steps).await?;
        logging::log_info("Migrations completed successfully!");
        return Ok(());
    }

    let repositories = RepositoryFactory::create_repositories(&db_pool);
    let locks: Arc<dyn LockService> = Arc::new(DatabaseLockService::new(
        db_pool.get_connection().clone(),
        config.ledger.address_lock_timeout,
    ));
    let daemon: Arc<dyn DaemonClient> =
        Arc::new(RpcDaemonClient::new(&config).context("failed to create daemon client")?);
    let services = LedgerServices::new(&config, repositories, locks, daemon, Vec::new());
    let actor = cli.actor.as_str();

    match cli.command {
        Commands::Migrate { .. } => {}
        Commands::Register { address } => {
            let (payment_address, account) =
                services.addresses.register(&address, &network).await?;
            print_json(&json!({
                "address": payment_address.address,
                "network": payment_address.network,
                "id": payment_address.id,
                "default_account": account.id,
            }))?;
        }
        Commands::CreateAccount { address, name } => {
            let account = services
                .addresses
                .create_account(&address, &network, &name, &json!({}))
                .await?;
            print_json(&json!({ "id": account.id, "name": account.name }))?;
        }
        Commands::Addresses => {
            let addresses = services.addresses.list(&network).await?;
            for address in addresses {
                println!("{}", address.address);
            }
        }
        Commands::Balances { address, account } => {
            let balances = match account {
                Some(name) => {
                    services
                        .addresses
                        .balances_for_account(&address, &network, &name)
                        .await?
                }
                None => {
                    services
                        .addresses
                        .balances_for_address(&address, &network)
                        .await?
                }
            };
            print_json(&balances)?;
        }
        Commands::ReconcileBalances {
            address,
            apply,
            reason,
        } => {
            let report = services
                .balance_reconciler
                .build_differences(&address, &network)
                .await?;
            print_json(&report)?;
            if apply && report.any {
                let call = AuditCall::new(
                    "reconcile_balances",
                    actor,
                    json!({ "address": address, "reason": reason }),
                );
                let applied = services
                    .balance_reconciler
                    .reconcile_differences(&address, &network, &report, &call)
                    .await?;
                logging::log_info(&format!("Applied {} balance adjustment(s)", applied));
            }
        }
        Commands::ReconcileUtxos {
            address,
            apply,
            reason,
        } => {
            let report = services
                .utxo_reconciler
                .build_differences(&address, &network)
                .await?;
            print_json(&report)?;
            if apply && report.any {
                let call = AuditCall::new(
                    "reconcile_utxos",
                    actor,
                    json!({ "address": address, "reason": reason }),
                );
                let applied = services
                    .utxo_reconciler
                    .reconcile_differences(&address, &network, &report, &call)
                    .await?;
                logging::log_info(&format!("Applied {} output correction(s)", applied));
            }
        }
        Commands::Transfer {
            address,
            from,
            to,
            asset,
            amount,
            reason,
        } => {
            let call = AuditCall::new(
                "transfer",
                actor,
                json!({ "address": address, "from": from, "to": to, "reason": reason }),
            );
            services
                .ledger
                .transfer(&address, &network, &from, &to, &asset, amount, &call)
                .await?;
        }
        Commands::TransferTxid {
            address,
            from,
            to,
            txid,
            reason,
        } => {
            let call = AuditCall::new(
                "transfer_by_txid",
                actor,
                json!({ "address": address, "from": from, "to": to, "txid": txid, "reason": reason }),
            );
            let moved = services
                .ledger
                .transfer_all_by_txid(&address, &network, &from, &to, &txid, &call)
                .await?;
            print_json(&moved)?;
        }
        Commands::Close {
            address,
            name,
            into,
            reason,
        } => {
            let call = AuditCall::new(
                "close_account",
                actor,
                json!({ "address": address, "account": name, "into": into, "reason": reason }),
            );
            let moved = services
                .ledger
                .close(&address, &network, &name, &into, &call)
                .await?;
            print_json(&moved)?;
        }
        Commands::Consolidate {
            address,
            into,
            reason,
        } => {
            let call = AuditCall::new(
                "consolidate_accounts",
                actor,
                json!({ "address": address, "into": into, "reason": reason }),
            );
            let moved = services
                .ledger
                .consolidate_all_accounts(&address, &network, &into, &call)
                .await?;
            print_json(&moved)?;
        }
        Commands::Prune { days } => {
            let days = days.unwrap_or(config.ledger.retention_days);
            let before = Utc::now() - Duration::days(days);
            let call = AuditCall::new(
                "prune_history",
                actor,
                json!({ "before": before.to_rfc3339(), "days": days }),
            );
            let summary = services
                .ledger
                .prune_confirmed_history(before, &call)
                .await?;
            logging::log_info(&format!(
                "Pruned {} entries into {} summaries across {} address(es)",
                summary.entries_removed, summary.collapsed, summary.addresses
            ));
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
