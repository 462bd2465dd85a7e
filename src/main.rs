use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use leadsync::{ApiClient, Config, Connectivity, RequestConfig, SqliteStore};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "leadsync")]
#[command(about = "Offline-first client for a lead-management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/leadsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Treat the network as unavailable: serve from cache and queue writes
  #[arg(long)]
  offline: bool,

  /// Use an in-memory store that is discarded on exit
  #[arg(long)]
  ephemeral: bool,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Work with leads
  #[command(subcommand)]
  Leads(LeadsCommand),
  /// GET an arbitrary endpoint through the cache
  Get {
    endpoint: String,
    /// Skip the cache and go to the network
    #[arg(long)]
    no_cache: bool,
  },
  /// Replay queued writes against the server
  Sync,
  /// Show connectivity, queue and cache counts
  Status,
  /// Delete all cached responses
  ClearCache,
  /// Log in and store the session token
  Login {
    email: String,
    #[arg(long, env = "LEADSYNC_PASSWORD", hide_env_values = true)]
    password: String,
  },
  /// Forget the token and all local data
  Logout,
}

#[derive(Subcommand, Debug)]
enum LeadsCommand {
  List,
  /// Create a lead from a JSON object
  Create { json: String },
  /// Update fields of a lead from a JSON object
  Update { id: String, json: String },
  Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let store_path = config.store_path()?;

  let _guard = setup_tracing(args.log_stderr, &store_path)?;

  let store = if args.ephemeral {
    SqliteStore::open_in_memory()?
  } else {
    SqliteStore::open(&store_path)?
  };
  let client = ApiClient::from_config(&config, store, Connectivity::new(!args.offline))?;

  match args.command {
    Command::Leads(cmd) => run_leads(&client, cmd).await,
    Command::Get { endpoint, no_cache } => {
      let mut request = RequestConfig::default();
      if no_cache {
        request = request.without_cache();
      }
      print_json(&client.get(&endpoint, request).await?)
    }
    Command::Sync => {
      if args.offline {
        return Err(eyre!("cannot sync while offline"));
      }
      print_json(&client.sync_offline_data().await?)
    }
    Command::Status => print_json(&client.status()?),
    Command::ClearCache => {
      let removed = client.clear_cache()?;
      println!("removed {} cached responses", removed);
      Ok(())
    }
    Command::Login { email, password } => {
      client.login(&email, &password).await?;
      println!("logged in as {}", email);
      Ok(())
    }
    Command::Logout => {
      client.logout()?;
      println!("logged out");
      Ok(())
    }
  }
}

async fn run_leads(client: &ApiClient, cmd: LeadsCommand) -> Result<()> {
  let response = match cmd {
    LeadsCommand::List => client.get_leads().await?,
    LeadsCommand::Create { json } => client.create_lead(parse_object(&json)?).await?,
    LeadsCommand::Update { id, json } => client.update_lead(&id, parse_object(&json)?).await?,
    LeadsCommand::Delete { id } => client.delete_lead(&id).await?,
  };
  print_json(&response)
}

fn parse_object(raw: &str) -> Result<Value> {
  let value: Value = serde_json::from_str(raw).map_err(|e| eyre!("invalid JSON: {}", e))?;
  if !value.is_object() {
    return Err(eyre!("expected a JSON object"));
  }
  Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Install the tracing subscriber. Logs go to `leadsync.log` next to the
/// store unless `to_stderr` is set; the returned guard flushes the file
/// writer on drop.
fn setup_tracing(to_stderr: bool, store_path: &Path) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leadsync=info"));

  if to_stderr {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr))
      .init();
    return Ok(None);
  }

  let log_dir = store_path.parent().unwrap_or(Path::new("."));
  std::fs::create_dir_all(log_dir)?;
  let file_appender = tracing_appender::rolling::never(log_dir, "leadsync.log");
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(
      fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true),
    )
    .init();

  Ok(Some(guard))
}
