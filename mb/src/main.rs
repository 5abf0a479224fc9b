//! MatterBridge CLI entry point

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, error, info, warn};

use matterbridge::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use matterbridge::config::Config;
use matterbridge::events::{EventBus, spawn_event_logger};
use matterbridge::flow::{DeviceCategory, FlowDefinition, NodeKind};
use matterbridge::host::Host;
use matterbridge::http::{self, SharedHost};
use matterbridge::resource::{PairingData, pairing};
use matterstore::{NamespaceKind, StorageRoot};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run { flow, no_http }) => {
            let flow_path = flow.unwrap_or_else(|| config.flow.clone());
            cmd_run(config, flow_path, no_http).await
        }
        Some(Command::Check { flow, format }) => {
            let flow_path = flow.unwrap_or_else(|| config.flow.clone());
            cmd_check(&flow_path, format)
        }
        Some(Command::Pairing { node_id, flow, format }) => {
            let flow_path = flow.unwrap_or_else(|| config.flow.clone());
            cmd_pairing(&config, &flow_path, &node_id, format)
        }
        Some(Command::Decommission {
            node_id,
            flow,
            destroy,
        }) => {
            let flow_path = flow.unwrap_or_else(|| config.flow.clone());
            cmd_decommission(&config, &flow_path, &node_id, destroy)
        }
        None => {
            let mut cmd = Cli::command().after_help(generate_after_help());
            cmd.print_help()?;
            Ok(())
        }
    }
}

/// Deploy the flow and run until SIGINT/SIGTERM; SIGHUP redeploys
async fn cmd_run(config: Config, flow_path: PathBuf, no_http: bool) -> Result<()> {
    debug!(?flow_path, no_http, "cmd_run: called");
    let config = Arc::new(config);
    let storage = StorageRoot::open(&config.storage.root)
        .context(format!("Failed to open storage at {}", config.storage.root.display()))?;
    let events = Arc::new(EventBus::new(config.events.capacity));
    let logger = spawn_event_logger(events.clone(), &config.events.dir)?;

    let flow = load_flow(&flow_path)?;
    let host = Host::build(flow, config.clone(), storage.clone(), events.clone());
    report_failures(&host);
    let shared: SharedHost = Arc::new(RwLock::new(Arc::new(host)));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let http_task = if config.http.enabled && !no_http {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        Some(tokio::spawn(http::serve(config.http.bind, shared.clone(), shutdown)))
    } else {
        None
    };

    println!(
        "{} Bridge running with flow {} (Ctrl+C to stop, SIGHUP to redeploy)",
        "✓".green(),
        flow_path.display().to_string().cyan()
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("SIGHUP received - redeploying flow");
                    redeploy(&shared, &flow_path, &config, &storage, &events).await;
                }
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Ctrl+C received");
    }

    info!("Bridge shutting down");
    let host = shared.read().await.clone();
    if let Err(e) = host.close(false).await {
        error!(error = %e, "Shutdown incomplete");
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = http_task {
        match task.await {
            Ok(Err(e)) => error!(error = %e, "Admin endpoint failed"),
            Err(e) => error!(error = %e, "Admin endpoint task panicked"),
            Ok(Ok(())) => {}
        }
    }
    logger.abort();
    debug!("cmd_run: shutdown complete");
    Ok(())
}

/// Close the running flow and deploy the one on disk
///
/// A flow that fails to load leaves the running one untouched.
async fn redeploy(shared: &SharedHost, flow_path: &Path, config: &Arc<Config>, storage: &StorageRoot, events: &Arc<EventBus>) {
    let next = match load_flow(flow_path) {
        Ok(flow) => flow,
        Err(e) => {
            error!(error = %e, "Failed to reload flow, keeping current deployment");
            return;
        }
    };

    let mut current = shared.write().await;
    if let Err(e) = current.close_for_redeploy(&next).await {
        error!(error = %e, "Redeploy teardown incomplete");
    }
    let host = Host::build(next, config.clone(), storage.clone(), events.clone());
    report_failures(&host);
    *current = Arc::new(host);
    info!("Flow redeployed");
}

fn load_flow(path: &Path) -> Result<FlowDefinition> {
    let flow = FlowDefinition::load(path)?;
    for problem in flow.validate() {
        warn!(%problem, "Flow problem");
    }
    Ok(flow)
}

fn report_failures(host: &Host) {
    for (id, reason) in host.failures() {
        eprintln!("{} {}: {}", "✗".red(), id.yellow(), reason);
    }
}

fn cmd_check(flow_path: &Path, format: OutputFormat) -> Result<()> {
    debug!(?flow_path, %format, "cmd_check: called");
    let flow = FlowDefinition::load(flow_path)?;
    let problems = flow.validate();
    let order: Vec<&str> = flow.build_order().into_iter().map(|n| n.id.as_str()).collect();

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "valid": problems.is_empty(),
                "order": order,
                "problems": problems.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            for problem in &problems {
                println!("{} {}", "✗".red(), problem);
            }
            if problems.is_empty() {
                println!("{} {} nodes, build order: {}", "✓".green(), order.len(), order.join(" → "));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(eyre::eyre!("Flow has {} problem(s)", problems.len()))
    }
}

/// Namespace holding a node's pairing state, if it publishes one
fn pairing_namespace(flow: &FlowDefinition, node_id: &str) -> Result<(NamespaceKind, u16)> {
    let def = flow
        .get(node_id)
        .ok_or_else(|| eyre::eyre!("Unknown node {}", node_id))?;
    match (def.kind, def.category) {
        (NodeKind::Aggregator, _) => Ok((NamespaceKind::Aggregator, def.discriminator)),
        (NodeKind::Device, DeviceCategory::Standalone) => Ok((NamespaceKind::Device, def.discriminator)),
        _ => Err(eyre::eyre!("{} ({}) has no pairing code", node_id, def.kind)),
    }
}

fn cmd_pairing(config: &Config, flow_path: &Path, node_id: &str, format: OutputFormat) -> Result<()> {
    debug!(%node_id, "cmd_pairing: called");
    let flow = FlowDefinition::load(flow_path)?;
    let (kind, discriminator) = pairing_namespace(&flow, node_id)?;
    let storage = StorageRoot::open(&config.storage.root)?;
    let namespace = storage.namespace(kind, node_id)?;
    let Some(data) = PairingData::load(&namespace, discriminator)? else {
        return Err(eyre::eyre!(
            "{} has not started yet, run the bridge once to generate its pairing code",
            node_id
        ));
    };
    let info = data.info(&namespace, &config.pairing.qr_base_url)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&info)?),
        OutputFormat::Text => {
            let state = if info.commissioned {
                "commissioned".green()
            } else {
                "not commissioned".yellow()
            };
            println!("{} ({})", node_id.cyan(), state);
            println!("  Pairing code: {}", info.manual_code.bold());
            println!("  QR code:      {}", info.url);
        }
    }
    Ok(())
}

fn cmd_decommission(config: &Config, flow_path: &Path, node_id: &str, destroy: bool) -> Result<()> {
    debug!(%node_id, destroy, "cmd_decommission: called");
    let flow = FlowDefinition::load(flow_path)?;
    let (kind, _) = pairing_namespace(&flow, node_id)?;
    let storage = StorageRoot::open(&config.storage.root)?;
    let namespace = storage.namespace(kind, node_id)?;

    if destroy {
        namespace.destroy()?;
        println!("{} Destroyed storage of {}", "✓".green(), node_id);
    } else {
        pairing::decommission(&namespace)?;
        println!("{} Decommissioned {}", "✓".green(), node_id);
    }
    Ok(())
}
