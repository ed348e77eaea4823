use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reqsync::app::App;
use reqsync::cache::CacheSource;
use reqsync::config::Config;
use reqsync::connectivity::Connectivity;
use reqsync::sync::{DrainOutcome, MutationKind, SubmitOutcome};

#[derive(Parser, Debug)]
#[command(name = "reqsync")]
#[command(about = "Offline outbox and sync agent for the requisition approval client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/reqsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, queued changes and cache state
  Status,
  /// Replay the outbox once
  Sync,
  /// List queued changes in replay order
  Pending,
  /// Drop a queued change
  Discard { seq: i64 },
  /// List requisitions, from the server or the local cache when offline
  List,
  /// Show one requisition
  Get { id: String },
  /// Create a requisition from a JSON payload
  Create { payload: String },
  /// Replace a requisition with a JSON payload
  Update { id: String, payload: String },
  /// Delete a requisition
  Delete { id: String },
  /// Manage the versioned static-asset cache
  #[command(subcommand)]
  Assets(AssetsCommand),
  /// Run the sync agent until interrupted
  Run,
}

#[derive(Subcommand, Debug)]
enum AssetsCommand {
  /// Pre-fetch the asset manifest into the current cache
  Install,
  /// Delete caches left by older versions
  Activate,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let mut app = App::new(config)?;
  let result = execute(&mut app, args.command).await;
  app.shutdown().await?;
  result
}

/// Log to a daily file in the data directory; `--verbose` adds stderr.
fn init_tracing(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .map(|dir| dir.join("reqsync").join("logs"))
    .ok_or_else(|| eyre!("Cannot determine data directory for logs"))?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
    &log_dir,
    "reqsync.log",
  ));
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reqsync=info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

async fn execute(app: &mut App, command: Command) -> Result<()> {
  match command {
    Command::Status => {
      let state = app.connect().await;
      let pending = app.queue().pending_count()?;
      println!("server:   {}", describe(state));
      println!("pending:  {}", pending);
      println!("cache:    {}", app.interceptor().cache_name());
    }
    Command::Sync => {
      if app.probe().await == Connectivity::Offline {
        return Err(eyre!("Server unreachable, nothing replayed"));
      }
      match app.drain().await? {
        DrainOutcome::AlreadyRunning => println!("a sync is already running"),
        DrainOutcome::Completed(report) => {
          println!(
            "confirmed {}, remaining {}",
            report.confirmed, report.remaining
          );
          if let Some(halt) = report.halted {
            return Err(eyre!(
              "Sync halted at #{} ({}): {}",
              halt.seq,
              halt.kind,
              halt.error
            ));
          }
        }
      }
    }
    Command::Pending => {
      for item in app.queue().pending()? {
        println!(
          "#{:<5} {:<7} {:<12} {}  {}",
          item.seq,
          item.kind,
          item
            .target
            .clone()
            .or_else(|| item.placeholder_id())
            .unwrap_or_default(),
          item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
          item.payload
        );
      }
    }
    Command::Discard { seq } => {
      let item = app.queue().remove_pending(seq)?;
      println!("discarded #{} ({})", item.seq, item.kind);
    }
    Command::List => {
      app.connect().await;
      let result = app.list().await?;
      if result.source == CacheSource::Offline {
        println!("(offline, cached copy)");
      }
      for entity in result.data {
        println!("{}", entity);
      }
    }
    Command::Get { id } => {
      app.connect().await;
      let result = app.get(&id).await?;
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }
    Command::Create { payload } => {
      submit(app, MutationKind::Create, None, Some(&payload)).await?;
    }
    Command::Update { id, payload } => {
      submit(app, MutationKind::Update, Some(&id), Some(&payload)).await?;
    }
    Command::Delete { id } => {
      submit(app, MutationKind::Delete, Some(&id), None).await?;
    }
    Command::Assets(AssetsCommand::Install) => {
      let count = app.interceptor().install().await?;
      println!("installed {} assets into {}", count, app.interceptor().cache_name());
    }
    Command::Assets(AssetsCommand::Activate) => {
      let deleted = app.interceptor().activate()?;
      if deleted.is_empty() {
        println!("no stale caches");
      }
      for name in deleted {
        println!("deleted {}", name);
      }
    }
    Command::Run => {
      app.run().await?;
    }
  }
  Ok(())
}

async fn submit(
  app: &App,
  kind: MutationKind,
  target: Option<&str>,
  payload: Option<&str>,
) -> Result<()> {
  let payload = match payload {
    Some(raw) => {
      serde_json::from_str(raw).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?
    }
    None => Value::Null,
  };

  app.connect().await;
  match app.submit(kind, target, payload).await? {
    SubmitOutcome::Confirmed(entity) => println!("{}", entity),
    SubmitOutcome::Queued(item) => match item.placeholder_id() {
      Some(local) => println!("queued #{} as {}", item.seq, local),
      None => println!("queued #{}", item.seq),
    },
  }
  Ok(())
}

fn describe(state: Connectivity) -> &'static str {
  match state {
    Connectivity::Online => "online",
    Connectivity::Offline => "offline",
  }
}
