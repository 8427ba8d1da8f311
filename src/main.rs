//! zonecasterd — authoritative DNS TXT tunnel controller.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use zonecaster::config::TunnelConfig;
use zonecaster::tunnel::Tunnel;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("BUILD_DATE");
const GIT_HASH: &str = env!("GIT_HASH");

#[derive(Parser)]
#[command(name = "zonecasterd")]
#[command(author = "Sina Rabbani")]
#[command(version = VERSION)]
#[command(about = "Authoritative DNS TXT tunnel controller", long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging (default: warn, -v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the DNS tunnel listener
    Serve {
        /// Apex zone this controller is authoritative for (overrides config)
        #[arg(long)]
        apex: Option<String>,

        /// UDP bind address, e.g. ":53" or "0.0.0.0:5300" (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// RSA keypair name (overrides config)
        #[arg(long)]
        rsa_keypair_name: Option<String>,
    },

    /// Print build metadata and exit
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            apex,
            bind,
            rsa_keypair_name,
        } => run_serve(cli.config, cli.verbose, apex, bind, rsa_keypair_name).await?,
        Commands::Version => {
            println!("zonecasterd {VERSION} ({GIT_HASH}, built {BUILD_DATE})");
        }
    }

    Ok(())
}

fn init_logger(verbose: u8, override_level: Option<&str>) {
    let mut logger = env_logger::Builder::from_default_env();

    if let Some(level) = override_level.and_then(|s| s.parse().ok()) {
        logger.filter_level(level);
    } else {
        let level = match verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        logger.filter_level(level);
    }

    logger.format_timestamp_millis().init();
}

async fn run_serve(
    config_path: Option<PathBuf>,
    verbose: u8,
    apex: Option<String>,
    bind: Option<String>,
    rsa_keypair_name: Option<String>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => TunnelConfig::from_file(&path)?,
        None => TunnelConfig::default(),
    };

    if let Some(apex) = apex {
        config.apex_domain = apex;
    }
    if let Some(bind) = bind.clone() {
        config.bind_address = bind;
    }
    if let Some(name) = rsa_keypair_name {
        config.rsa_keypair_name = name;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    init_logger(verbose, config.log_level.as_deref());

    info!("starting zonecasterd for apex {}", config.normalized_apex());
    let bind_address = config.bind_address.clone();
    let tunnel = Arc::new(Tunnel::new(config).await?);

    zonecaster::listener::serve(tunnel, &bind_address).await
}
