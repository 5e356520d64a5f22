//! Command-line interface for the pool state synchronizer.
//!
//! # Commands
//!
//! - `run`: bootstrap the pool store and keep it in sync with the chain
//! - `plan`: print the block window a cycle would fetch (offline)
//! - `exchanges`: list the supported exchanges
//!
//! # Example
//!
//! ```bash
//! # Follow the live head with two exchanges
//! dex-state-sync run --exchanges uniswap_v2,uniswap_v3
//!
//! # Replay from a block against a fork node for ten minutes
//! dex-state-sync run --replay-from-block 19000000 --fork-rpc-url http://127.0.0.1:8545 --timeout 600
//!
//! # Where would a cycle read with head 1000 and cursor 900?
//! dex-state-sync plan --head 1000 --last 900
//! ```

use crate::config::{parse_exchange_list, Config, ConfigOverrides};
use crate::error::TrackerResult;
use crate::exchanges::supported;
use crate::reorg::{plan_window, SyncCursor, SyncMode};
use crate::snapshot::LoggingConsumer;
use crate::sync::{RunSummary, SyncContext, SyncController};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

/// DEX pool state synchronizer
#[derive(Parser, Debug)]
#[command(name = "dex-state-sync")]
#[command(about = "Keeps an in-memory view of DEX pool state in sync with the chain", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the synchronizer
    Run(RunArgs),

    /// Print the window a cycle would fetch
    Plan {
        /// Chain head
        #[arg(long)]
        head: u64,

        /// Last block already processed
        #[arg(long)]
        last: u64,

        /// Blocks withheld below the head
        #[arg(long, default_value = "2")]
        reorg_delay: u64,

        /// Maximum blocks per log request
        #[arg(long, default_value = "2000")]
        max_block_fetch: u64,
    },

    /// List supported exchanges
    Exchanges,
}

/// Flags of `run`; each overrides the matching environment variable.
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON-RPC endpoint
    #[arg(long)]
    rpc_url: Option<String>,

    /// Comma-separated exchange names
    #[arg(long)]
    exchanges: Option<String>,

    /// Seconds between cycles
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum blocks per log request
    #[arg(long)]
    max_block_fetch: Option<u64>,

    /// Blocks withheld below the head
    #[arg(long)]
    reorg_delay: Option<u64>,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Stop right after bootstrap
    #[arg(long)]
    dry_run: bool,

    /// Replay starting at this block
    #[arg(long)]
    replay_from_block: Option<u64>,

    /// Fork node used while replaying
    #[arg(long)]
    fork_rpc_url: Option<String>,

    /// Directory for cached events and pool data
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Serve cached ranges instead of fetching
    #[arg(long)]
    use_cached_events: bool,

    /// Static pool dataset
    #[arg(long)]
    static_pool_data: Option<PathBuf>,
}

impl From<RunArgs> for ConfigOverrides {
    fn from(args: RunArgs) -> Self {
        Self {
            rpc_url: args.rpc_url,
            exchanges: args.exchanges.as_deref().map(parse_exchange_list),
            poll_interval_secs: args.poll_interval,
            max_block_fetch: args.max_block_fetch,
            reorg_delay: args.reorg_delay,
            timeout_secs: args.timeout,
            dry_run: args.dry_run,
            replay_from_block: args.replay_from_block,
            fork_rpc_url: args.fork_rpc_url,
            cache_dir: args.cache_dir,
            use_cached_events: args.use_cached_events,
            static_pool_data: args.static_pool_data,
        }
    }
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns configuration errors from startup and non-transient errors from
/// initialization.
pub async fn run() -> TrackerResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_sync_command(args).await,
        Commands::Plan {
            head,
            last,
            reorg_delay,
            max_block_fetch,
        } => {
            println!("{}", plan_message(head, last, reorg_delay, max_block_fetch));
            Ok(())
        }
        Commands::Exchanges => {
            for spec in supported() {
                println!(
                    "{:<16} {:<24} fee decimals {}",
                    spec.name.cyan(),
                    spec.family.to_string().dimmed(),
                    spec.fee_decimals
                );
            }
            Ok(())
        }
    }
}

async fn run_sync_command(args: RunArgs) -> TrackerResult<()> {
    let config = Config::from_env()?.with_overrides(args.into())?;
    print_banner(&config);

    let context = SyncContext::from_config(&config)?;
    info!(
        exchanges = config.exchanges().len(),
        dataset = context.dataset().len(),
        tokens = context.tokens().len(),
        "Context ready"
    );

    let mut controller = SyncController::new(context);
    let summary = controller.run(&mut LoggingConsumer).await?;
    print_summary(&summary);
    Ok(())
}

fn plan_message(head: u64, last: u64, reorg_delay: u64, max_block_fetch: u64) -> String {
    let cursor = SyncCursor::new(last, reorg_delay, SyncMode::Live);
    match plan_window(&cursor, head, max_block_fetch) {
        Some(window) => format!(
            "{} {} ({} blocks)",
            "Next window:".green().bold(),
            window,
            window.block_count()
        ),
        None => format!(
            "{} safe head {} has not passed block {}",
            "Nothing to fetch:".yellow().bold(),
            head.saturating_sub(reorg_delay),
            last
        ),
    }
}

fn print_banner(config: &Config) {
    let mode = match (config.replay_from_block(), config.fork_rpc_url()) {
        (Some(block), Some(_)) => format!("replay from {block} on fork"),
        (Some(block), None) => format!("replay of block {block}"),
        (None, _) => "live".to_string(),
    };

    println!("{}", "DEX pool state sync".cyan().bold());
    println!("  {:<14} {}", "mode".dimmed(), mode.yellow());
    println!("  {:<14} {}", "exchanges".dimmed(), config.exchanges().join(", "));
    println!("  {:<14} {}", "max blocks".dimmed(), config.max_block_fetch());
    println!("  {:<14} {}", "reorg delay".dimmed(), config.reorg_delay());
    println!("  {:<14} {}s", "poll interval".dimmed(), config.poll_interval_secs());
    if let Some(secs) = config.timeout_secs() {
        println!("  {:<14} {secs}s", "timeout".dimmed());
    }
    if let Some(dir) = config.cache_dir() {
        println!("  {:<14} {}", "cache".dimmed(), dir.display());
    }
    if config.dry_run() {
        println!("  {}", "dry run".magenta().bold());
    }
    println!();
}

fn print_summary(summary: &RunSummary) {
    let reason = summary
        .stop_reason
        .map_or_else(|| "unknown".to_string(), |reason| format!("{reason:?}"));

    println!();
    println!("{} {}", "Stopped:".green().bold(), reason);
    println!(
        "  cycles {} (failed {}, stagnant {}), terraforms {}",
        summary.cycles.to_string().yellow(),
        summary.failed_cycles,
        summary.stagnant_cycles,
        summary.terraforms
    );
    println!(
        "  bootstrap inserted {}, duplicates {}, unresolved {}",
        summary.bootstrap.inserted, summary.bootstrap.duplicates, summary.bootstrap.failed
    );
    println!(
        "  last block {}, active pools {}",
        summary.last_block_processed.to_string().yellow(),
        summary.pools.to_string().blue()
    );
}
