use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use towing_tank::config::Config;
use towing_tank::{pipeline, report, Error, Result};

const DEFAULT_CONFIG: &str = "towing_tank.toml";

fn load_config(path: &Path) -> Result<Config> {
    match Config::from_file(path) {
        Err(Error::MissingFile(_)) => {
            info!("{} not found, using campaign defaults", path.display());
            Ok(Config::default())
        }
        config => config,
    }
}

fn reduce(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let report = pipeline::run(&config)?;
    report::write_all(&config.output_dir, &report)?;
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);

    match reduce(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
