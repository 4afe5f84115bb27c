mod bundle;
mod cache;
mod cli;
mod cmd;
mod command;
mod config;
mod deps;
mod error;
mod fsutil;
mod http;
mod image;
mod instance;
mod logger;
mod sandbox;
mod spinner;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logger::init(cli.debug)?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "dockroot start");

    match cli::run(cli) {
        Ok(result) => {
            info!("dockroot finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "dockroot failed");
            Err(err)
        }
    }
}
