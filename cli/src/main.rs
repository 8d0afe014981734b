use clap::Parser;
use color_eyre::eyre::Result;

mod args;
mod cmd;
mod logging;

use args::{Args, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_dir = args.config_dir();

    match args.command {
        Commands::Init => cmd::init::run(&config_dir),
        Commands::Start => cmd::start::run(config_dir).await,
        Commands::Status => cmd::status::run().await,
        Commands::Version => cmd::version::run(),
    }
}
