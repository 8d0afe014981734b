//! Command-line arguments for the `signctrl` binary.
//!
//! The configuration directory is taken from `--config-dir`, falling back to
//! the `SIGNCTRL_CONFIG_DIR` environment variable, `$HOME/.signctrl` and
//! finally the current directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "signctrl", version, about = "High-availability remote signer for Tendermint validators", long_about = None)]
pub struct Args {
    /// Configuration directory (default: `$HOME/.signctrl`)
    #[arg(long, global = true, value_name = "DIR", env = "SIGNCTRL_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Create the configuration directory and initial files
    Init,

    /// Start the SignCTRL signer
    Start,

    /// Show the running signer's status
    Status,

    /// Print version information
    Version,
}

impl Args {
    /// Returns the configuration directory to operate on.
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(signctrl_config::config_dir)
    }
}
