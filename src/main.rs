use anyhow::Result;
use clap::Parser;
use pockets::cli::Cli;
use pockets::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    init_logging(config.log_format, cli.verbose);
    cli.run(config).await
}
