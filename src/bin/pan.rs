//! Pan daemon binary
//!
//! Loads configuration, mounts the fabric modules and runs until Ctrl+C.

use clap::Parser;
use pan::ping::PingModule;
use pan::{
    AppConfig, AppSettings, BroadcastModule, Engine, Module, NodeModule, QuicModule, SettingsGuard,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Pan peer-to-peer node daemon
#[derive(Parser, Debug)]
#[command(name = "pan", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("Pan starting");

    let (settings, loaded_paths) = if let Some(config_path) = &args.config {
        // Explicit config file specified - load only that file
        match AppSettings::load_file(config_path) {
            Ok(settings) => (settings, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match AppSettings::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }
    info!(
        name = %settings.name(),
        root = %settings.root_path().display(),
        "Node settings"
    );

    let node = Arc::new(NodeModule::new());
    let modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(AppConfig::new(settings)),
        node.clone(),
        Arc::new(BroadcastModule::new()),
        Arc::new(SettingsGuard::new()),
        Arc::new(PingModule::new()),
        Arc::new(QuicModule::new(node.clone())),
    ];

    let mut engine = Engine::new();
    if let Err(e) = engine.mount_all(modules) {
        error!("Failed to mount modules: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = engine.bootstrap().await {
        error!("Failed to start: {}", e);
        std::process::exit(1);
    }

    match node.identity().node_id() {
        Some(node_id) => info!("  node_id: {}", node_id.to_hex()),
        None => warn!("Node credentials unavailable"),
    }
    info!("Pan running, press Ctrl+C to exit");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    info!("Pan shutting down");
    if let Err(e) = engine.shutdown().await {
        warn!("Error during shutdown: {}", e);
    }
    info!("Pan shutdown complete");
}
