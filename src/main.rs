/// photo-triage - terminal front end
///
/// Opens a review session over a photo folder and drives it from stdin,
/// one command per line. The session prints its state after every action.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_triage::cache::ContentState;
use photo_triage::session::{self, Direction, SessionHandle, SessionSnapshot};
use photo_triage::{Decision, DecisionStore, EngineConfig, FolderSource};

const HELP: &str = "\
k keep   d delete   u clear decision
n next   p previous h hide/show decided
r restart   retry   s stats   purge   q quit";

/// Command-line arguments for photo-triage
#[derive(Parser, Debug)]
#[command(name = "photo-triage")]
#[command(about = "Keep or delete photos one at a time, then purge the deleted ones")]
#[command(version)]
struct Args {
    /// Folder containing the photos to review
    folder: PathBuf,

    /// Config file (overrides PHOTO_TRIAGE_CONFIG and the default location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where decisions are stored (overrides the config file)
    #[arg(long, env = "PHOTO_TRIAGE_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Skip photos that already have a decision
    #[arg(long)]
    hide_decided: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_triage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(state_file) = args.state_file {
        config.state_file = state_file;
    }
    info!("Decisions file: {}", config.state_file.display());

    anyhow::ensure!(
        args.folder.is_dir(),
        "{} is not a folder",
        args.folder.display()
    );

    // Walking a large folder blocks, keep it off the runtime threads
    let folder = args.folder.clone();
    let (source, sequence) = tokio::task::spawn_blocking(move || {
        let source = FolderSource::new(folder);
        let sequence = source.scan();
        (source, sequence)
    })
    .await
    .context("Folder scan failed")?;

    let store = DecisionStore::open(&config.state_file);
    let (handle, task) = session::open(
        store,
        sequence,
        Arc::new(source),
        config.cache.clone(),
        args.hide_decided,
    );

    println!("{}", HELP);
    print_snapshot(&handle.snapshot().await?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = line.trim();
        if command == "q" {
            break;
        }
        match run_command(&handle, command).await {
            Ok(Some(snapshot)) => print_snapshot(&snapshot),
            Ok(None) => {}
            Err(e) => println!("❌ {}", e),
        }
    }

    let store = handle.close().await.context("Session ended unexpectedly")?;
    task.await.context("Session task panicked")?;
    let stats = store.stats();
    info!(
        kept = stats.kept_count,
        deleted = stats.deleted_count,
        "Session finished"
    );
    Ok(())
}

/// Execute one line of input; `None` means there is nothing new to show
async fn run_command(handle: &SessionHandle, command: &str) -> Result<Option<SessionSnapshot>> {
    let snapshot = match command {
        "" => return Ok(None),
        "k" => handle.decide_current(Decision::Kept).await?,
        "d" => handle.decide_current(Decision::Deleted).await?,
        "u" => handle.decide_current(Decision::Unset).await?,
        "n" => handle.navigate(Direction::Next).await?,
        "p" => handle.navigate(Direction::Previous).await?,
        "h" => {
            let hide = !handle.latest().hide_decided;
            handle.set_hide_decided(hide).await?
        }
        "r" => handle.restart().await?,
        "retry" => handle.retry_current().await?,
        "s" => {
            let stats = handle.snapshot().await?.stats;
            let kept_storage = stats
                .kept_storage_bytes
                .map(|b| format!("{} bytes", b))
                .unwrap_or_else(|| "calculating...".to_string());
            println!(
                "📊 kept {}, deleted {}, purged {} ({} bytes freed), kept storage {}",
                stats.kept_count,
                stats.deleted_count,
                stats.total_items_purged,
                stats.total_bytes_freed,
                kept_storage
            );
            return Ok(None);
        }
        "purge" => {
            let report = handle.purge_deleted().await?;
            println!(
                "🗑️  Purged {} photos, {} bytes freed",
                report.items_purged, report.bytes_freed
            );
            handle.snapshot().await?
        }
        other => {
            println!("Unknown command {:?}\n{}", other, HELP);
            return Ok(None);
        }
    };
    Ok(Some(snapshot))
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let Some(id) = snapshot.current_id.as_deref() else {
        println!(
            "✅ Done. {} kept, {} deleted. (p: go back, r: restart, purge: remove deleted)",
            snapshot.stats.kept_count, snapshot.stats.deleted_count
        );
        return;
    };

    let decision = match snapshot.current_decision {
        Decision::Unset => "",
        Decision::Kept => " [kept]",
        Decision::Deleted => " [deleted]",
    };
    let content = match &snapshot.content {
        ContentState::Idle | ContentState::Loading => "loading".to_string(),
        ContentState::Placeholder(c) => format!("preview {} bytes", c.len()),
        ContentState::Ready(c) => format!("{} bytes", c.len()),
        ContentState::Failed(reason) => format!("failed: {} (retry to try again)", reason),
    };
    let warning = if snapshot.unsaved_changes {
        " ⚠️  decisions not saved yet"
    } else {
        ""
    };
    println!(
        "[{}] {}{} ({}){}",
        snapshot.position_text(),
        id,
        decision,
        content,
        warning
    );
}
