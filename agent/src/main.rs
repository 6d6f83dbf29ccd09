//! Deploy Agent - Entry Point
//!
//! Manages the deployment lifecycle of containerized services on a single
//! host and exposes it over a local HTTP API.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use colored::Colorize;
use deploy_agent::app::options::AppOptions;
use deploy_agent::app::run::run;
use deploy_agent::errors::AgentError;
use deploy_agent::ledger::{FileStore, Ledger};
use deploy_agent::logs::{init_logging, LogOptions};
use deploy_agent::models::deployment::{DeploymentRecord, DeploymentStatus};
use deploy_agent::storage::layout::StorageLayout;
use deploy_agent::storage::settings::Settings;
use deploy_agent::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version info: {}", e),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Print a service's ledger and exit
    if let Some(service) = cli_args.get("history") {
        if let Err(e) = print_history(&layout, service).await {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
        return;
    }

    // Retrieve the settings file
    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging; the guard flushes the log file on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let options = AppOptions::new(layout, settings);
    info!(
        "Running deploy agent from {} on {}:{}",
        options.layout.base_dir.display(),
        options.server.host,
        options.server.port
    );
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the agent: {e}");
        std::process::exit(1);
    }
}

async fn print_history(layout: &StorageLayout, service: &str) -> Result<(), AgentError> {
    deploy_agent::validation::validate_service_name(service)?;
    let ledger = Ledger::new(Arc::new(FileStore::from_layout(layout)));
    let records = ledger.history(service).await?;

    if records.is_empty() {
        println!("No deployments recorded for {}", service);
        return Ok(());
    }

    println!("{}", format!("Deployments of {}", service).bold());
    for record in &records {
        println!("{}", history_line(record));
    }
    Ok(())
}

fn history_line(record: &DeploymentRecord) -> String {
    let status = format!("{:<11}", record.status.as_str());
    let status = match record.status {
        DeploymentStatus::Healthy => status.green(),
        DeploymentStatus::Pending => status.yellow(),
        DeploymentStatus::Failed => status.red(),
        DeploymentStatus::RolledBack => status.magenta(),
        DeploymentStatus::Stopped => status.dimmed(),
    };

    let mut line = format!(
        "  {}  {}  {}  {}  port {}  {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        status,
        record.short_sha(),
        record.image_tag,
        record.host_port,
        record.deployment_id.dimmed()
    );
    if let Some(original) = &record.original_deployment_id {
        line.push_str(&format!("  (rollback of {})", original));
    }
    line
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
