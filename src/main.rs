// src/main.rs

//! The main entry point for the faultline engine.

use anyhow::Result;
use faultline::FaultlineError;
use faultline::config::Config;
use faultline::core::builder::{DynamicSubgraphBuilder, RunMode};
use faultline::core::detection::FaultDetection;
use faultline::core::sag::SuspiciousActivityGraph;
use faultline::core::store::DataStore;
use faultline::core::watchlist::Watchlist;
use faultline::ipc::IpcClient;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

const MODE_NORMAL: &str = "--normal";
const MODE_HOLISTIC: &str = "--holistic";

fn usage(programme: &str) -> String {
    format!("Usage: {programme} ({MODE_NORMAL}|{MODE_HOLISTIC}) CONFIGURATION_FILE")
}

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("faultline version {VERSION}");
        return Ok(());
    }

    if args.len() != 3 {
        eprintln!(
            "Invalid number of arguments {}, expected 2.\n{}",
            args.len() - 1,
            usage(&args[0])
        );
        std::process::exit(1);
    }

    let mode = match args[1].as_str() {
        MODE_NORMAL => RunMode::Normal,
        MODE_HOLISTIC => RunMode::Holistic,
        other => {
            eprintln!(
                "Invalid argument '{other}', use {MODE_NORMAL} or {MODE_HOLISTIC}.\n{}",
                usage(&args[0])
            );
            std::process::exit(1);
        }
    };

    // Setup logging with compact format and ANSI colors.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    let config_path = Path::new(&args[2]);
    if !config_path.is_file() || config_path.extension().is_none_or(|ext| ext != "json") {
        error!(
            "Invalid configuration file '{}', must be a regular json file.",
            config_path.display()
        );
        std::process::exit(2);
    }

    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(FaultlineError::Io(e)) => {
            error!("Can not open file '{}': {e}", config_path.display());
            std::process::exit(3);
        }
        Err(e) => {
            error!("Invalid configuration '{}': {e}", config_path.display());
            std::process::exit(2);
        }
    };

    info!("faultline {VERSION} starting in {mode:?} mode");

    // Attach to the graph information service; retries are governed by the
    // configuration, exhaustion is fatal.
    let ipc = IpcClient::connect(&config.ipc).await.inspect_err(|e| {
        error!("{e}");
    })?;

    let store = Arc::new(DataStore::new(ipc));
    let watchlist = Arc::new(Watchlist::new(&config, store.clone()));
    let detection = Arc::new(FaultDetection::new(&config, watchlist.clone()));
    let sag = Arc::new(SuspiciousActivityGraph::new());
    let builder = DynamicSubgraphBuilder::new(&config, store, watchlist, detection, sag, mode);

    let (shutdown_tx, _) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, aborting"),
            _ = sighup.recv() => info!("SIGHUP received, aborting"),
        }
        let _ = signal_tx.send(());
    });

    if let Err(e) = builder.run(shutdown_tx).await {
        error!("builder runtime error: {e}");
        return Err(e.into());
    }

    info!("shut down cleanly");
    Ok(())
}
