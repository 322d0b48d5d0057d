//! fleetd — the FleetGrid daemon.
//!
//! Single binary that assembles the fleet reconcilers:
//! - State store (redb) for player connection records
//! - Address mapping cache + refresher
//! - Idle compute scanner
//! - Termination reconciler and match event router
//! - REST API for notification intake and connection lookups
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleet.toml --data-dir /var/lib/fleetgrid --port 8080
//! fleetd check-config --config fleet.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetgrid_adapters::{
    HttpAddressTranslator, HttpFleetRegistry, HttpOrchestrator, HttpPlaneClient,
    HttpSessionDirectory,
};
use fleetgrid_api::ApiState;
use fleetgrid_core::{
    AddressTranslator, FleetConfig, FleetRegistry, Orchestrator, SessionDirectory,
};
use fleetgrid_mapping::{AddressMappingCache, MappingRefresher};
use fleetgrid_reconciler::TerminationReconciler;
use fleetgrid_router::{MatchEventRouter, RetryPolicy};
use fleetgrid_scanner::IdleComputeScanner;
use fleetgrid_state::StateStore;

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconcilers and the API server.
    Run {
        /// Path to fleet.toml.
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,
    },
    /// Parse fleet.toml and print the effective configuration.
    CheckConfig {
        #[arg(long, default_value = "fleet.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            port,
        } => run(&config, data_dir, port).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetd=debug,fleetgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(path)?;
    config.endpoints()?;

    let scanner = config.scanner();
    let mapping = config.mapping();
    let router = config.router();
    let reconciler = config.reconciler();
    println!("{}", config.to_toml_string()?);
    println!("# effective timings");
    println!("# scanner.interval        = {:?}", scanner.interval());
    println!("# scanner.batch_size      = {}", scanner.protection_batch_size());
    println!("# mapping.refresh         = {:?}", mapping.refresh_interval());
    println!("# router.resolve_attempts = {}", router.resolve_attempts());
    println!("# router.resolve_backoff  = {:?}", router.resolve_backoff());
    println!("# reconciler.call_timeout = {:?}", reconciler.call_timeout());
    Ok(())
}

async fn run(config_path: &Path, data_dir: PathBuf, port: u16) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(config_path)?;
    let endpoints = config.endpoints()?.clone();
    let scanner_cfg = config.scanner();
    let mapping_cfg = config.mapping();
    let router_cfg = config.router();
    let reconciler_cfg = config.reconciler();

    if let Some(fleet) = &config.fleet {
        info!(fleet = %fleet.fleet_id, location = ?fleet.location_id, "FleetGrid daemon starting");
    } else {
        info!("FleetGrid daemon starting");
    }

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("fleetgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let orchestrator: Arc<dyn Orchestrator> =
        Arc::new(HttpOrchestrator::new(HttpPlaneClient::new(&endpoints.orchestrator)));
    let sessions: Arc<dyn SessionDirectory> =
        Arc::new(HttpSessionDirectory::new(HttpPlaneClient::new(&endpoints.sessions)));
    let registry: Arc<dyn FleetRegistry> =
        Arc::new(HttpFleetRegistry::new(HttpPlaneClient::new(&endpoints.registry)));
    let translator: Arc<dyn AddressTranslator> =
        Arc::new(HttpAddressTranslator::new(HttpPlaneClient::new(&endpoints.translator)));
    info!(
        orchestrator = %endpoints.orchestrator,
        sessions = %endpoints.sessions,
        registry = %endpoints.registry,
        translator = %endpoints.translator,
        "plane gateways configured"
    );

    let cache = AddressMappingCache::new(mapping_cfg.refresh_interval());
    let router = MatchEventRouter::new(store, cache.clone())
        .with_retry(RetryPolicy::from_config(&router_cfg));
    let refresher = MappingRefresher::new(translator, cache.clone(), mapping_cfg.call_timeout())
        .with_callback(router.correction_callback());

    let scanner = IdleComputeScanner::new(orchestrator, sessions.clone())
        .with_call_timeout(scanner_cfg.call_timeout())
        .with_batch_size(scanner_cfg.protection_batch_size());

    let reconciler = TerminationReconciler::new(registry, sessions)
        .with_call_timeout(reconciler_cfg.call_timeout());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh_shutdown = shutdown_rx.clone();
    let scan_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let refresh_interval = mapping_cfg.refresh_interval();
    let refresh_handle = tokio::spawn(async move {
        refresher.run(refresh_interval, refresh_shutdown).await;
    });

    let scan_interval = scanner_cfg.interval();
    let scan_handle = tokio::spawn(async move {
        scanner.run(scan_interval, scan_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let app = fleetgrid_api::build_router(ApiState {
        router,
        reconciler: Arc::new(reconciler),
        cache,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = refresh_handle.await;
    let _ = scan_handle.await;

    info!("FleetGrid daemon stopped");
    Ok(())
}
