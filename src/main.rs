use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gkepool::config::Config;
use gkepool::gcp::auth::GcpCredentials;
use gkepool::gcp::client::{GcpClient, DEFAULT_CONTAINER_ENDPOINT};
use gkepool::nodepool::{NodePoolId, NodePoolSpec};
use gkepool::reconcile::{Backoff, Deletion, MutexStore, NodePoolReconciler, SystemClock};
use gkepool::state::{NodePoolState, StateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Reconcile GKE node pools
#[derive(Parser, Debug)]
#[command(name = "gkepool", version = gkepool::VERSION, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// GCP project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// GKE location (region or zone) to use
    #[arg(short, long, global = true)]
    location: Option<String>,

    /// Overall timeout in minutes, overriding the configured one
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// State file (default: <config dir>/gkepool/state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Bearer token to use instead of Application Default Credentials
    #[arg(long, env = "GKEPOOL_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a node pool from a manifest
    Create {
        /// YAML manifest
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Apply a changed manifest to an existing node pool
    Update {
        /// YAML manifest
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a node pool
    Delete {
        /// projects/P/locations/L/clusters/C/nodePools/N, P/L/C/N or L/C/N
        id: String,
    },
    /// Refresh a node pool, resuming an interrupted operation
    Read {
        /// projects/P/locations/L/clusters/C/nodePools/N, P/L/C/N or L/C/N
        id: String,
    },
    /// Adopt an existing node pool into the state file
    Import {
        /// projects/P/locations/L/clusters/C/nodePools/N, P/L/C/N or L/C/N
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gkepool started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gkepool").join("gkepool.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gkepool").join("gkepool.log");
    }
    PathBuf::from("gkepool.log")
}

/// Everything a subcommand needs
struct Session {
    config: Config,
    project: Option<String>,
    location: Option<String>,
    timeout: Option<Duration>,
    store: StateStore,
    reconciler: NodePoolReconciler,
}

impl Session {
    async fn new(global: &GlobalArgs, cancel: CancellationToken) -> Result<Self> {
        let config = Config::load();
        let project = config.effective_project(global.project.as_deref());
        let location = config.effective_location(global.location.as_deref());
        tracing::info!("Using project: {:?}, location: {:?}", project, location);

        let credentials = match &global.access_token {
            Some(token) => GcpCredentials::from_static_token(token.as_str()),
            None => GcpCredentials::new().await?,
        };
        let endpoint = config
            .api_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_CONTAINER_ENDPOINT);
        let client = GcpClient::with_endpoint(credentials, endpoint)?;

        let store_path = match &global.state {
            Some(path) => path.clone(),
            None => StateStore::default_path().context("Cannot determine the config directory")?,
        };

        let interval = config.poll_interval();
        let reconciler = NodePoolReconciler::new(
            Arc::new(client),
            Arc::new(MutexStore::new()),
            Arc::new(SystemClock),
            Backoff::new(interval, interval.saturating_mul(5)),
            cancel,
        );

        Ok(Self {
            timeout: global.timeout.map(|mins| Duration::from_secs(mins.saturating_mul(60))),
            config,
            project,
            location,
            store: StateStore::new(store_path),
            reconciler,
        })
    }

    fn parse_id(&self, id: &str) -> Result<NodePoolId> {
        Ok(NodePoolId::parse(id, self.project.as_deref())?)
    }

    fn load_manifest(&self, file: &Path) -> Result<(NodePoolSpec, NodePoolId)> {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read manifest {:?}", file))?;
        let spec = NodePoolSpec::from_yaml(&content)?;
        let id = spec.identity(self.project.as_deref(), self.location.as_deref())?;
        Ok((spec, id))
    }

    fn stored(&self, id: &NodePoolId) -> Result<NodePoolState> {
        self.store
            .get(&id.full_name())?
            .with_context(|| format!("{} is not in {:?}; import it first", id, self.store.path()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_guard = setup_logging(cli.global.log_level)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping the current wait");
            eprintln!("Interrupted; the in-flight operation will be resumed on the next read");
            on_interrupt.cancel();
        }
    });

    let ctx = Session::new(&cli.global, cancel).await?;

    if let Err(err) = run(&ctx, cli.command).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", gkepool::gcp::http::format_gcp_error(&err));
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(ctx: &Session, command: Command) -> Result<()> {
    match command {
        Command::Create { file } => {
            let (spec, id) = ctx.load_manifest(&file)?;
            let timeout = ctx.timeout.unwrap_or_else(|| ctx.config.create_timeout());

            let state = match ctx.reconciler.create(&id, &spec, timeout).await {
                Ok(state) => state,
                Err(err) => {
                    if let Some(state) = err.recorded_state() {
                        ctx.store.put(state)?;
                        tracing::info!("Recorded {} despite the failed create", state.id);
                    }
                    return Err(err.into());
                }
            };
            ctx.store.put(&state)?;
            match &state.operation {
                Some(op) => println!("Create of {} interrupted; operation {} saved", id, op),
                None => println!("Created {} ({})", id, state.status.as_deref().unwrap_or("unknown")),
            }
        }
        Command::Update { file } => {
            let (spec, id) = ctx.load_manifest(&file)?;
            let timeout = ctx.timeout.unwrap_or_else(|| ctx.config.update_timeout());
            let prior = ctx.stored(&id)?;

            let state = ctx.reconciler.update(&prior, &spec, timeout).await?;
            ctx.store.put(&state)?;
            match &state.operation {
                Some(op) => println!("Update of {} interrupted; operation {} saved", id, op),
                None => println!("Updated {}", id),
            }
        }
        Command::Delete { id } => {
            let id = ctx.parse_id(&id)?;
            let timeout = ctx.timeout.unwrap_or_else(|| ctx.config.delete_timeout());

            match ctx.reconciler.delete(&id, timeout).await? {
                Deletion::Deleted => {
                    ctx.store.remove(&id.full_name())?;
                    println!("Deleted {}", id);
                }
                Deletion::AlreadyAbsent => {
                    ctx.store.remove(&id.full_name())?;
                    println!("{} does not exist", id);
                }
                Deletion::Interrupted(handle) => {
                    ctx.store.record_operation(&id.full_name(), Some(handle.name.clone()))?;
                    println!("Delete of {} interrupted; operation {} is still running", id, handle.name);
                }
            }
        }
        Command::Read { id } => {
            let id = ctx.parse_id(&id)?;
            let timeout = ctx.timeout.unwrap_or_else(|| ctx.config.create_timeout());
            let prior = ctx.stored(&id)?;

            match ctx.reconciler.read(&prior, timeout).await? {
                Some(state) => {
                    ctx.store.put(&state)?;
                    print!("{}", state.spec.to_yaml()?);
                    println!("# status: {}", state.status.as_deref().unwrap_or("unknown"));
                }
                None => {
                    ctx.store.remove(&id.full_name())?;
                    println!("{} no longer exists; removed from state", id);
                }
            }
        }
        Command::Import { id } => {
            let timeout = ctx.timeout.unwrap_or_else(|| ctx.config.create_timeout());

            let state = ctx
                .reconciler
                .import(&id, ctx.project.as_deref(), timeout)
                .await?;
            ctx.store.put(&state)?;
            println!("Imported {}", state.id);
        }
    }
    Ok(())
}
