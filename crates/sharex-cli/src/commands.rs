use std::path::Path;

use anyhow::Context;
use colored::Colorize;
use sharex_server::config::load_or_default;
use sharex_server::{open_engine, EngineKind, ServerConfig, ShareXServer};
use sharex_storage::MongoStorageConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Config(args) => cmd_config(args, cli.format),
    }
}

fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    info!(path = %path.display(), "loading configuration");
    ServerConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(address) = args.address {
        config.webserver_address = address;
    }
    if let Some(engine) = args.engine {
        config.storage_engine = engine;
    }
    let kind: EngineKind = config.storage_engine.parse()?;

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        info!(engine = %kind, "initializing storage engine");
        let engine = open_engine(&config)
            .await
            .with_context(|| format!("initializing storage engine {kind}"))?;
        let server = ShareXServer::new(config, engine)?;
        println!(
            "{} ShareX server on {}. Enter {} or {} to shut down.",
            "✓".green().bold(),
            server.config().webserver_address.bold(),
            "\"close\"".yellow(),
            "\"stop\"".yellow(),
        );
        server.serve(shutdown_signal()).await?;
        println!("Thank you for using the ShareX server. Bye!");
        Ok(())
    })
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let kind: EngineKind = config.storage_engine.parse()?;
    let engine_config = match kind {
        EngineKind::MongoFile => Some(
            load_or_default::<MongoStorageConfig>(&config.storage_engine_config)
                .with_context(|| format!("loading {}", config.storage_engine_config.display()))?,
        ),
        EngineKind::Memory => None,
    };

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "server": config,
                "storage_engine": engine_config,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("{} {}", "#".dimmed(), args.config.display().to_string().bold());
            print!("{}", toml::to_string(&config)?);
            if let Some(engine_config) = engine_config {
                println!();
                println!(
                    "{} {}",
                    "#".dimmed(),
                    config.storage_engine_config.display().to_string().bold()
                );
                print!("{}", toml::to_string(&engine_config)?);
            }
        }
    }
    Ok(())
}

/// Whether a console line asks the server to shut down.
fn is_stop_command(line: &str) -> bool {
    matches!(line.trim(), "close" | "stop")
}

/// Resolves on Ctrl-C, SIGTERM, or a "close"/"stop" line on stdin.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            debug!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                debug!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let console = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if is_stop_command(&line) => return,
                Ok(Some(_)) => continue,
                // A closed stdin (daemon, service manager) leaves the signals in charge.
                Ok(None) | Err(_) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
        _ = console => info!("shutdown requested from console"),
    }
    info!("shutting down ShareX server");
}
