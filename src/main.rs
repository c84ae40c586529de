use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tracing::{error, info};

use emme::{config::Config, logger, server::Server};

#[derive(Parser)]
#[command(name = "emme", about = "edge http server", version)]
struct Args {
    /// Path to the yaml configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading configuration from {}: {e}", args.config.display());
            return ExitCode::from(1);
        }
    };

    let _guard = match logger::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "starting server on port {} with up to {} connections",
        config.server.port, config.server.max_connections
    );

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            error!("error starting server: {e}");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server exited: {e}");
            ExitCode::FAILURE
        }
    }
}
