//! gatesh-daemon - release gate evaluation daemon
//!
//! Loads gates and cluster objects from manifests, evaluates every gate on a
//! bounded worker pool, and keeps each gate's status current until stopped.
//!
//! # Prometheus Metrics
//!
//! Unless `--no-metrics` is given, metrics are served at
//! `http://127.0.0.1:<metrics-port>/metrics` (default port 9100).
//!
//! # One-shot mode
//!
//! `--once` evaluates every gate a single time, prints the gates with their
//! statuses as JSON on stdout, and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gatesh_core::{GateReconciler, GateshConfig, InMemoryObjectStore};
use gatesh_daemon::metrics::{self, SharedMetricsRegistry, new_shared_registry};
use gatesh_daemon::{GateRegistry, Manifests, WorkerPool};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// gatesh daemon - declarative release gate evaluator
#[derive(Parser, Debug)]
#[command(name = "gatesh-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Manifest files or directories (replace the configured list)
    #[arg(long, num_args = 1..)]
    manifests: Vec<PathBuf>,

    /// Evaluate every gate once, print statuses as JSON and exit
    #[arg(long)]
    once: bool,

    /// Maximum number of gates evaluated concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Port for Prometheus metrics HTTP endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Disable Prometheus metrics HTTP endpoint
    #[arg(long)]
    no_metrics: bool,
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        // stdout carries the --once report
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<GateshConfig> {
    let mut config = match &args.config {
        Some(path) => GateshConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GateshConfig::default(),
    };
    if !args.manifests.is_empty() {
        config.daemon.manifests.clone_from(&args.manifests);
    }
    if let Some(workers) = args.workers {
        config.daemon.workers = workers;
    }
    if let Some(port) = args.metrics_port {
        config.daemon.metrics_port = port;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    let config = load_config(&args)?;

    let manifests = Manifests::load(&config.daemon.manifests).context("failed to load manifests")?;
    let store = Arc::new(InMemoryObjectStore::with_objects(manifests.objects));
    let registry = Arc::new(GateRegistry::new());
    for gate in manifests.gates {
        let name = gate.metadata.name.clone();
        registry
            .apply(gate)
            .await
            .with_context(|| format!("gate {name} rejected"))?;
    }
    info!(
        gates = registry.len().await,
        objects = store.len(),
        workers = config.daemon.workers,
        "gatesh-daemon starting"
    );

    let reconciler = GateReconciler::new(Arc::clone(&store), Arc::clone(&registry))
        .with_defaults(config.defaults.clone())
        .with_target_timeout(config.daemon.target_timeout);
    let pool = WorkerPool::new(
        reconciler,
        Arc::clone(&registry),
        config.daemon.workers,
        config.daemon.tick_interval,
    );

    if args.once {
        pool.run_once().await;
        let gates = registry.list().await;
        println!(
            "{}",
            serde_json::to_string_pretty(&gates).context("failed to encode statuses")?
        );
        return Ok(());
    }

    let metrics_registry = if args.no_metrics {
        None
    } else {
        Some(new_shared_registry().context("failed to initialize metrics registry")?)
    };
    let pool = match &metrics_registry {
        Some(metrics) => pool.with_metrics(metrics.gate_metrics().clone()),
        None => pool,
    };

    let metrics_task = metrics_registry.map(|metrics| {
        let addr: SocketAddr = ([127, 0, 0, 1], config.daemon.metrics_port).into();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics, addr).await {
                error!("{e:#}");
            }
        })
    });

    pool.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await;

    if let Some(task) = metrics_task {
        task.abort();
    }
    info!("gatesh-daemon stopped");
    Ok(())
}

/// Serves gate metrics on `addr` until the task is aborted.
async fn run_metrics_server(metrics_registry: SharedMetricsRegistry, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {addr}"))?;
    info!(addr = %addr, "metrics listener ready");

    axum::serve(listener, metrics::router(metrics_registry))
        .await
        .context("metrics listener stopped")
}
