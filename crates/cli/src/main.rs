mod args;
mod config;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;

use args::{Cli, Commands};
use config::{ConfigFile, Settings};
use runner::run_scan;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => {
            let file = match &args.config {
                Some(path) => ConfigFile::load(path)?,
                None => ConfigFile::default(),
            };
            let settings = Settings::resolve(&args, file);

            astra_telemetry::init_logging(cli.verbose, settings.log_json)?;
            if let Some(listen) = settings.metrics_listen {
                astra_telemetry::init_metrics(listen)?;
            }

            run_scan(args, settings).await?;
        }
    }

    Ok(())
}
