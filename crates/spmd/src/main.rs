//! spmd — the service provider manager daemon.
//!
//! Single binary that owns the provider store and runs the health
//! monitor:
//! - State store (redb)
//! - Health monitor (periodic liveness probes with backoff)
//! - Control API for registry operations, sharing the monitor's store
//! - Provider registry subcommands, as clients of the control API
//!
//! # Usage
//!
//! ```text
//! spmd run --config /etc/spm/spm.toml
//! spmd provider register --name kubevirt --service-type vm --endpoint http://kubevirt:8080
//! spmd check --endpoint http://kubevirt:8080
//! ```

mod api;
mod client;
mod config;
mod provider;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use spm_health::config::{format_duration, parse_duration};
use spm_health::{HealthMonitor, HttpProber, Probe, ProbeResult};
use spm_state::StateStore;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::client::ApiClient;
use crate::config::DaemonConfig;
use crate::provider::ProviderCommand;

#[derive(Parser)]
#[command(name = "spmd", about = "Service provider manager daemon")]
struct Cli {
    /// Path to spm.toml.
    #[arg(long, global = true, env = "SPM_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the provider database (overrides the config file).
    #[arg(long, global = true, env = "SPM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Control API of a running daemon (defaults to `http://{api_addr}`).
    #[arg(long, global = true, env = "SPM_API_URL")]
    api_url: Option<String>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the health monitor until interrupted.
    Run,

    /// Manage registered providers through a running daemon.
    #[command(subcommand)]
    Provider(ProviderCommand),

    /// Probe a single endpoint once and report the result.
    Check {
        /// Provider base URL; `/health` is appended.
        #[arg(long)]
        endpoint: String,

        /// Probe timeout (e.g. "5s", "500ms").
        #[arg(long, default_value = "5s")]
        timeout: String,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Provider(command) => {
            let api_url = cli.api_url.unwrap_or_else(|| config.api_url());
            let client = ApiClient::new(&api_url)?;
            provider::execute(&client, command).await
        }
        Command::Check { endpoint, timeout } => check_endpoint(&endpoint, &timeout).await,
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spmd=debug,spm_health=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn open_store(config: &DaemonConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    info!("service provider manager starting");

    let store = Arc::new(open_store(&config)?);
    let monitor = HealthMonitor::new(Arc::clone(&store), config.health_check)?;
    let listener = TcpListener::bind(config.api_addr).await?;
    info!(addr = %config.api_addr, "control API listening");

    serve(listener, store, monitor, shutdown_signal()).await?;
    info!("service provider manager stopped");
    Ok(())
}

/// Run the health monitor and the control API over one store until
/// `shutdown` resolves, then stop both.
async fn serve<P, F>(
    listener: TcpListener,
    store: Arc<StateStore>,
    monitor: HealthMonitor<StateStore, P>,
    shutdown: F,
) -> anyhow::Result<()>
where
    P: Probe + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let handle = monitor.start();

    let result = axum::serve(listener, api::build_router(store))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown signal received");
        })
        .await;

    if handle.is_finished() {
        warn!("health monitor stopped before shutdown");
    }
    handle.shutdown().await;
    Ok(result?)
}

async fn check_endpoint(endpoint: &str, timeout: &str) -> anyhow::Result<()> {
    let timeout = parse_duration(timeout)
        .ok_or_else(|| anyhow::anyhow!("invalid timeout {timeout:?}"))?;
    let prober = HttpProber::new(timeout)?;
    match prober.check(endpoint).await {
        ProbeResult::Healthy => {
            println!("{endpoint}: healthy");
            Ok(())
        }
        ProbeResult::Unhealthy => anyhow::bail!("{endpoint}: unhealthy (non-2xx response)"),
        ProbeResult::Failed => anyhow::bail!(
            "{endpoint}: unreachable within {}",
            format_duration(prober.timeout())
        ),
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
