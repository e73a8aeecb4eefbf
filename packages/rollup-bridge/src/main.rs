//! Rollup Bridge CLI
//!
//! Read paths (status, deadline, pending, scan, watch) and the transfer flows
//! (ETH and NFT deposits and withdrawals, claims) against a configured parent
//! chain and rollup.

use alloy::primitives::{Address, B256, U256};
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use rollup_bridge::deadline::{claim_ready_at, format_timestamp, remaining};
use rollup_bridge::poller::DEFAULT_STATUS_INTERVAL;
use rollup_bridge::types::parse_tx_hash;
use rollup_bridge::{metrics, App, BridgeError, Config, ErrorReport};

#[derive(Parser)]
#[command(name = "rollup-bridge")]
#[command(about = "Track and drive parent/rollup bridge transfers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lifecycle status of the message created by a child transaction
    Status {
        #[arg(value_parser = parse_tx_hash)]
        tx_hash: B256,
    },

    /// Estimated claim-ready time of a child transaction
    Deadline {
        #[arg(value_parser = parse_tx_hash)]
        tx_hash: B256,
    },

    /// Reconciled pending NFT withdrawals of an owner
    Pending {
        #[arg(long)]
        owner: Address,
    },

    /// Rebuild an owner's outgoing NFT transfers from event logs
    Scan {
        #[arg(long)]
        owner: Address,

        /// Override the configured start block
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// Re-resolve every stored transfer and drop executed or stale ones
    Reconcile,

    /// Follow status and countdown of a child transaction until executed
    Watch {
        #[arg(value_parser = parse_tx_hash)]
        tx_hash: B256,

        /// Seconds between status polls
        #[arg(long, default_value_t = DEFAULT_STATUS_INTERVAL.as_secs())]
        interval_secs: u64,
    },

    /// Deposit ETH (wei) to the rollup
    DepositEth {
        #[arg(long)]
        amount: U256,
    },

    /// Withdraw ETH (wei) to a parent-chain address
    WithdrawEth {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: U256,
    },

    /// Bridge a parent-chain NFT to the rollup
    DepositNft {
        #[arg(long)]
        token_id: U256,
        #[arg(long)]
        to: Address,
    },

    /// Start withdrawing a rollup NFT to the parent chain
    WithdrawNft {
        #[arg(long)]
        token_id: U256,
        #[arg(long)]
        recipient: Address,
    },

    /// Execute a confirmed withdrawal on the parent chain
    Claim {
        #[arg(value_parser = parse_tx_hash)]
        tx_hash: B256,

        /// Switch the active network to the parent chain first
        #[arg(long)]
        switch_network: bool,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;
    info!(
        parent_rpc = %config.parent_rpc_url,
        child_rpc = %config.child_rpc_url,
        signer = config.private_key.is_some(),
        "Configuration loaded"
    );

    let app = App::build(&config).await?;

    match cli.command {
        Commands::Status { tx_hash } => {
            let resolved = app.resolver.resolve(tx_hash).await;
            match resolved {
                Ok(resolved) => print_json(&resolved.message())?,
                Err(e) => report(e)?,
            }
        }

        Commands::Deadline { tx_hash } => match app.deadlines.initiated_at(tx_hash).await {
            Ok(initiated_at) => {
                let deadline = claim_ready_at(
                    initiated_at,
                    app.deadlines.buffer_minutes(),
                );
                let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
                println!("initiated:        {}", format_timestamp(initiated_at));
                println!("claim ready at:   {}", format_timestamp(deadline));
                println!("remaining:        {}s", remaining(deadline, now));
                println!(
                    "challenge ends:   {}",
                    format_timestamp(app.deadlines.challenge_period_end(initiated_at))
                );
            }
            Err(e) => report(e)?,
        },

        Commands::Pending { owner } => match app.reconciler.pending_for(owner).await {
            Ok(pending) => {
                metrics::set_pending_transfers(app.store.list_all().await?.len());
                for transfer in pending {
                    let status = transfer
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{}  token {}  {}  {}",
                        transfer.record.tx_hash,
                        transfer.record.token_id,
                        status,
                        transfer.record.name.as_deref().unwrap_or("-")
                    );
                }
            }
            Err(e) => report(e)?,
        },

        Commands::Scan { owner, from_block } => {
            let scan = match from_block {
                Some(from) => {
                    let head = app.child.block_number().await?;
                    app.scanner.scan_range(owner, from, head).await
                }
                None => app.scanner.scan(owner).await,
            };
            match scan {
                Ok(scan) => {
                    for transfer in &scan.transfers {
                        print_json(&transfer.record)?;
                    }
                    info!(
                        transfers = scan.transfers.len(),
                        skipped = scan.skipped.len(),
                        "Scan complete"
                    );
                }
                Err(e) => report(e)?,
            }
        }

        Commands::Reconcile => match app.reconciler.reconcile().await {
            Ok(result) => {
                metrics::set_pending_transfers(result.kept.len());
                info!(
                    kept = result.kept.len(),
                    executed = result.executed.len(),
                    stale = result.stale.len(),
                    "Reconciliation complete"
                );
            }
            Err(e) => report(e)?,
        },

        Commands::Watch {
            tx_hash,
            interval_secs,
        } => watch(&app, tx_hash, Duration::from_secs(interval_secs)).await?,

        Commands::DepositEth { amount } => {
            let _events = log_transitions(&app);
            finish(app.orchestrator.deposit_eth(amount).await)?;
        }

        Commands::WithdrawEth { to, amount } => {
            let _events = log_transitions(&app);
            finish(app.orchestrator.withdraw_eth(to, amount).await)?;
        }

        Commands::DepositNft { token_id, to } => {
            let _events = log_transitions(&app);
            finish(app.orchestrator.deposit_nft(token_id, to).await)?;
        }

        Commands::WithdrawNft {
            token_id,
            recipient,
        } => {
            let _events = log_transitions(&app);
            finish(app.orchestrator.withdraw_nft(token_id, recipient).await)?;
        }

        Commands::Claim {
            tx_hash,
            switch_network,
        } => {
            if switch_network {
                app.orchestrator.switch_network(app.parent.chain_id())?;
            }
            let _events = log_transitions(&app);
            finish(app.orchestrator.claim(tx_hash).await)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rollup_bridge=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a user-facing report. A rejected signature is a silent abort.
fn report(error: BridgeError) -> Result<()> {
    match ErrorReport::from_error(&error) {
        Some(report) => {
            eprintln!("{}", report.summary);
            eprintln!("  {}", report.detail);
            Err(error.into())
        }
        None => {
            info!("Cancelled");
            Ok(())
        }
    }
}

fn finish<T: Serialize>(result: rollup_bridge::Result<T>) -> Result<()> {
    match result {
        Ok(outcome) => print_json(&outcome),
        Err(e) => report(e),
    }
}

/// Log every flow transition until the returned task is dropped
fn log_transitions(app: &App) -> AbortOnDrop {
    let mut events = app.orchestrator.subscribe();
    AbortOnDrop(tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let state = serde_json::to_string(&event.state).unwrap_or_default();
            info!(flow = %event.flow, state = %state, "Transition");
        }
    }))
}

struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn watch(app: &App, tx_hash: B256, interval: Duration) -> Result<()> {
    let mut status = app.poller.watch_status(tx_hash, interval);
    let mut deadline = app.poller.watch_deadline(tx_hash, Duration::from_secs(1));
    let mut deadline_done = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping watch");
                break;
            }
            update = status.next() => match update {
                Some(s) => {
                    println!("status: {}", s);
                    if s.is_terminal() {
                        break;
                    }
                }
                None => {
                    warn!(tx_hash = %tx_hash, "Status watch ended");
                    break;
                }
            },
            update = deadline.next(), if !deadline_done => match update {
                Some(d) => println!("claim ready in {}s", d.remaining),
                None => deadline_done = true,
            },
        }
    }

    status.cancel();
    deadline.cancel();
    Ok(())
}
