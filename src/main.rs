use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetwatch::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[derive(Parser)]
#[command(name = "fleetwatch", version, about = "Hypervisor fleet inventory and subnet occupancy")]
struct Cli {
    /// Config file; defaults to $CONFIG_FILE, then config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the JSON API and the background poll/scan worker.
    Serve,
    /// Poll every host once.
    Poll,
    /// Scan one prefix, or every stored prefix when none is given.
    Scan { prefix: Option<String> },
    /// Manage the stored subnet prefixes.
    Subnets {
        #[command(subcommand)]
        action: SubnetAction,
    },
}

#[derive(Subcommand)]
enum SubnetAction {
    List,
    Add { prefix: String },
    Remove { prefix: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();
    let app_config = match &cli.config {
        Some(path) => config::AppConfig::load_from_path(path)?,
        None => config::AppConfig::load()?,
    };
    let repo = Arc::new(bootstrap::prepare_store(&app_config).await?);

    let result = run(cli.command, repo.clone(), app_config).await;
    repo.close().await;
    result
}

async fn run(
    command: Command,
    repo: Arc<inventory_repo::InventoryRepo>,
    app_config: config::AppConfig,
) -> Result<()> {
    let prober: Arc<dyn scanner::Prober> = Arc::new(scanner::PingProber::new(
        Duration::from_millis(app_config.scanner.probe_timeout_ms),
    ));
    let width = app_config.scanner.max_concurrent_probes;

    match command {
        Command::Serve => serve(repo, prober, app_config).await,
        Command::Poll => {
            let connector = Arc::new(hypervisor::vsphere::VsphereConnector::new(
                &app_config.collector,
            )?);
            let summary = collector::poll_all_hosts(
                repo,
                connector,
                app_config.collector.max_concurrent_hosts,
            )
            .await?;
            println!(
                "polled {} hosts: {} updated, {} unreachable, {} failed, {} VMs",
                summary.hosts,
                summary.succeeded,
                summary.connect_failures,
                summary.poll_failures,
                summary.vms
            );
            Ok(())
        }
        Command::Scan { prefix: Some(raw) } => {
            let prefix: models::SubnetPrefix = raw.parse()?;
            let s = scanner::scan_subnet(&repo, prober.as_ref(), &prefix, width).await?;
            println!("{}: {} occupied, {} free", s.prefix, s.occupied, s.free);
            Ok(())
        }
        Command::Scan { prefix: None } => {
            let bulk = scanner::scan_all_subnets(&repo, prober.as_ref(), width).await?;
            for s in &bulk.subnets {
                println!("{}: {} occupied, {} free", s.prefix, s.occupied, s.free);
            }
            if bulk.failures > 0 {
                println!("{} subnets failed", bulk.failures);
            }
            Ok(())
        }
        Command::Subnets { action } => subnets(&repo, action).await,
    }
}

async fn subnets(repo: &inventory_repo::InventoryRepo, action: SubnetAction) -> Result<()> {
    match action {
        SubnetAction::List => {
            for prefix in repo.list_subnets().await? {
                println!("{prefix}");
            }
        }
        SubnetAction::Add { prefix } => {
            let prefix: models::SubnetPrefix = prefix.parse()?;
            if repo.add_subnet(&prefix).await? {
                println!("added {prefix}");
            } else {
                println!("{prefix} already exists");
            }
        }
        SubnetAction::Remove { prefix } => {
            let prefix: models::SubnetPrefix = prefix.parse()?;
            if repo.remove_subnet(&prefix).await? {
                println!("removed {prefix}");
            } else {
                println!("{prefix} not found");
            }
        }
    }
    Ok(())
}

async fn serve(
    repo: Arc<inventory_repo::InventoryRepo>,
    prober: Arc<dyn scanner::Prober>,
    app_config: config::AppConfig,
) -> Result<()> {
    let connector: Arc<dyn hypervisor::HypervisorConnector> = Arc::new(
        hypervisor::vsphere::VsphereConnector::new(&app_config.collector)?,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            repo: repo.clone(),
            connector: connector.clone(),
            prober: prober.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            poll_interval_secs: app_config.schedule.poll_interval_secs,
            poll_schedule: app_config.schedule.poll_schedule.clone(),
            scan_interval_secs: app_config.schedule.scan_interval_secs,
            max_concurrent_hosts: app_config.collector.max_concurrent_hosts,
            max_concurrent_probes: app_config.scanner.max_concurrent_probes,
        },
    );

    let app = routes::app(repo, connector, prober, app_config.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = worker_handle.await;
        }
    }

    Ok(())
}
