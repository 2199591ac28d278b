use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use ephemera::configuration::config::Config;
use ephemera::configuration::types::{ConfigOverrides, StorageBackend};
use ephemera::controller::{Command, Controller};

#[derive(Parser)]
#[command(name = "ephemera")]
#[command(version = "0.0.2")]
#[command(about = "Ephemeral image store: every capture is deleted once its retention window ends")]
struct Args {
    /// TOML configuration file
    #[arg(long, env = "EPHEMERA_CONFIG")]
    config: Option<PathBuf>,

    /// Retention window for new captures, in seconds
    #[arg(long, env = "EPHEMERA_TTL_SECS")]
    ttl_secs: Option<u64>,

    /// Where captures are kept
    #[arg(long, value_enum, env = "EPHEMERA_STORAGE_BACKEND")]
    storage_backend: Option<StorageBackend>,

    /// Database file or storage directory
    #[arg(long, env = "EPHEMERA_STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let overrides = ConfigOverrides {
        ttl_secs: args.ttl_secs,
        storage_backend: args.storage_backend,
        storage_path: args.storage_path,
    };
    let config = Config::load(args.config.as_deref(), &overrides).unwrap_or_else(|e| {
        error!("Unable to import configuration: {}", e);
        std::process::exit(1);
    });
    info!("Configuration imported successfully");

    let mut controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    let result = controller.run(args.command).await;
    controller.shutdown().await;
    if let Err(e) = result {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }
}
