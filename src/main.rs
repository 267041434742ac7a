use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use bronzeman_ledger_sync::ledger::clock::SystemClock;
use bronzeman_ledger_sync::ledger::table::{InMemoryTable, MemoryConnector};
use bronzeman_ledger_sync::{ItemId, LedgerConfig, Repository, UnlockedItem};
use std::path::PathBuf;
use std::sync::Arc;

const MEMORY_SCHEME: &str = "memory://";

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Table SAS URL, or memory://<name> for a throwaway in-process table.
    #[arg(long)]
    endpoint: String,

    /// Name new unlocks are attributed to.
    #[arg(long)]
    user: String,

    /// JSON file with engine settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `sync_period_secs` from the config.
    #[arg(long)]
    sync_period_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every unlocked item.
    List,
    /// Record an item as unlocked.
    Unlock {
        #[arg(long)]
        item_id: ItemId,
        #[arg(long)]
        name: String,
    },
    /// Remove an item from the ledger.
    Relock {
        #[arg(long)]
        item_id: ItemId,
    },
    /// Print unlocks from other group members as sync discovers them.
    Watch,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LedgerConfig::from_json_file(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(period) = args.sync_period_secs {
        config.sync_period_secs = period;
    }
    config.validate()?;

    // Results are awaited on this runtime; the repository and its blocking
    // HTTP client stay outside of it.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    let repo = build_repository(&args.endpoint, config);
    repo.add_state_listener(|state| log::info!("[MAIN] ledger state: {}", state));

    println!("[MAIN] Connecting as {}...", args.user);
    if let Err(e) = runtime.block_on(repo.initialize(&args.endpoint, &args.user)) {
        bail!("{} ({})", e.user_message(), e);
    }
    println!("[MAIN] {} unlocked items", repo.get_unlocked_items().len());

    match &args.command {
        Command::List => print_items(&repo),
        Command::Unlock { item_id, name } => {
            let item = repo.create_new_item(*item_id, name.as_str());
            let stored = runtime
                .block_on(repo.insert_item(item))
                .with_context(|| format!("failed to unlock item {}", item_id))?;

            if stored.acquired_by() == args.user {
                println!("[MAIN] Unlocked {} ({})", stored.item_name(), stored.item_id());
            } else {
                println!(
                    "[MAIN] {} was already unlocked by {}",
                    stored.item_name(),
                    stored.acquired_by()
                );
            }
        }
        Command::Relock { item_id } => {
            runtime
                .block_on(repo.delete_item(*item_id))
                .with_context(|| format!("failed to relock item {}", item_id))?;
            println!("[MAIN] Relocked item {}", item_id);
        }
        Command::Watch => {
            repo.add_item_listener(|items| {
                for item in items {
                    println!(
                        "[WATCH] {} unlocked {} ({})",
                        item.acquired_by(),
                        item.item_name(),
                        item.item_id()
                    );
                }
            });
            println!(
                "[MAIN] Watching for unlocks every {:?}, Ctrl-C to stop",
                repo.config().sync_period()
            );
            runtime
                .block_on(tokio::signal::ctrl_c())
                .context("failed to listen for Ctrl-C")?;
        }
    }

    repo.close();
    Ok(())
}

fn build_repository(endpoint: &str, config: LedgerConfig) -> Repository {
    if endpoint.starts_with(MEMORY_SCHEME) {
        log::info!("[MAIN] using an in-process table for {}", endpoint);
        let connector = MemoryConnector::new(InMemoryTable::new());
        Repository::new(config, Arc::new(connector), Arc::new(SystemClock))
    } else {
        Repository::with_http(config)
    }
}

fn print_items(repo: &Repository) {
    let mut items: Vec<UnlockedItem> = repo.get_unlocked_items().into_values().collect();
    items.sort_by_key(UnlockedItem::item_id);

    println!("-----------------------------------");
    for item in &items {
        println!(
            "{:>8}  {:<30} {}",
            item.item_id(),
            item.item_name(),
            item.acquired_by()
        );
    }
    println!("-----------------------------------");
    println!("Total Items:      {}", items.len());
}
