//! Standalone translation engine.
//!
//! Loads the engine config, seeds an in-memory inventory and metadata
//! store from its `[[devices]]` table, and serves the driver gateway on
//! `<socket_dir>/engine.sock` until SIGINT or SIGTERM.
//!
//! ```bash
//! devconf-engine -c /etc/devconf/engine.toml -l debug
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};

use devconf::{EngineConfig, Gateway};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("devconf-engine: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    match config.log_level(args.log_level.as_deref()) {
        Ok(level) => devconf::config::init_logging(level),
        Err(e) => {
            eprintln!("devconf-engine: {e}");
            return ExitCode::FAILURE;
        }
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: EngineConfig) -> devconf::Result<()> {
    let (inventory, store) = config.seed().await?;
    info!("Seeded {} device(s)", config.devices.len());

    let gateway = Gateway::bind(
        &config.translation.socket_dir,
        config.translation.rpc_timeout(),
        Arc::new(inventory),
        Arc::new(store),
    )
    .await?;
    gateway.run_until_signal().await;
    Ok(())
}

struct Args {
    config: Option<PathBuf>,
    log_level: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut config = None;
        let mut log_level = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    i += 1;
                    if i < args.len() {
                        config = Some(PathBuf::from(&args[i]));
                    }
                }
                "--log-level" | "-l" => {
                    i += 1;
                    if i < args.len() {
                        log_level = Some(args[i].clone());
                    }
                }
                "--help" | "-h" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self { config, log_level }
    }

    fn print_help() {
        println!(
            r#"devconf-engine

USAGE:
    devconf-engine [OPTIONS]

OPTIONS:
    -c, --config <PATH>       Engine config file (TOML)
    -l, --log-level <LEVEL>   Log level override (error, warn, info, debug, trace)
    -h, --help                Print this help message
"#
        );
    }
}
