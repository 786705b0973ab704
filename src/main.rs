mod app;
mod cache;
mod config;
mod db;
mod event;
mod intercept;
mod logging;
mod queue;
mod remote;
mod roles;
mod stock;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stationsync")]
#[command(about = "Offline checklist queue and sync client for fire-station operations")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/stationsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log level or filter directive (RUST_LOG takes precedence)
  #[arg(long, default_value = "info")]
  log_level: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show how many submissions are waiting to sync
  Status,
  /// List queued submissions
  List,
  /// Queue a checklist submission from a JSON file
  Save { file: PathBuf },
  /// Push queued submissions to the backend
  Drain,
  /// Drop a queued submission without sending it
  Discard { id: String },
  /// Read a backend path through the cache
  Fetch { path: String },
  /// Recommend the stock batch to use next
  Stock {
    item_id: String,
    /// Plan a withdrawal of this many units
    #[arg(short, long)]
    quantity: Option<u64>,
  },
  /// Delete every cached response
  PurgeCache,
  /// Run the background sync worker until interrupted
  Watch {
    /// Take over from a previously active cache version right away
    #[arg(long)]
    skip_waiting: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let log_dir = if config.logging.file {
    Some(config.data_dir()?)
  } else {
    None
  };
  let _log_guard = logging::init(&args.log_level, log_dir.as_deref())?;

  let app = app::App::new(config)?;

  match args.command {
    Command::Status => app.status(),
    Command::List => app.list(),
    Command::Save { file } => app.save(&file),
    Command::Drain => app.drain().await,
    Command::Discard { id } => app.discard(&id),
    Command::Fetch { path } => app.fetch(&path).await,
    Command::Stock { item_id, quantity } => app.stock(&item_id, quantity).await,
    Command::PurgeCache => app.purge_cache(),
    Command::Watch { skip_waiting } => app.watch(skip_waiting).await,
  }
}
