//! Configuration for a SignCTRL node: the `config.toml` model with its
//! validation rules, the configuration-directory resolution and the persisted
//! state file that survives restarts.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

pub mod state;
pub mod template;

pub use state::State;

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable selecting the configuration directory.
pub const CONFIG_DIR_ENV: &str = "SIGNCTRL_CONFIG_DIR";

/// Default directory name under `$HOME`.
const DEFAULT_DIR: &str = ".signctrl";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("couldn't read configuration: {0}")]
    Read(#[from] config::ConfigError),

    #[error("invalid config:\n{0}")]
    Invalid(String),
}

/// Minimum log level for SignCTRL logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "DEBUG")]
    Debug,
    #[default]
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERR")]
    Err,
}

impl LogLevel {
    /// The equivalent `tracing` filter directive.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Err => "error",
        }
    }
}

/// The `[base]` section of `config.toml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Minimum log level (DEBUG, INFO, WARN, ERR).
    #[serde(default)]
    pub log_level: LogLevel,

    /// Fixed number of replicas sharing the validator identity. Must match
    /// across all replicas of the set.
    pub set_size: u32,

    /// Number of consecutive missed block signatures that triggers a rank
    /// update.
    pub threshold: u32,

    /// Rank used on the very first start, before any state has been
    /// persisted.
    pub start_rank: u32,

    /// Address of the validator's privval listener to dial
    /// (`tcp://host:port` or `unix:///path.sock`).
    pub validator_laddr: String,

    /// Address of the validator's RPC endpoint used for commit lookups
    /// (`tcp://host:port`).
    pub validator_laddr_rpc: String,

    /// Inactivity timeout and dial-retry interval (e.g. `15s`).
    #[serde(with = "humantime_serde")]
    pub retry_dial_after: Duration,
}

/// The `[privval]` section of `config.toml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivvalConfig {
    /// Chain ID the signer is willing to sign for.
    pub chain_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub base: BaseConfig,
    pub privval: PrivvalConfig,
}

impl Config {
    fn validate(&self) -> Result<(), Error> {
        let mut errs = String::new();

        if self.base.set_size < 2 {
            errs.push_str("\tset_size must be 2 or higher\n");
        }
        if self.base.threshold < 1 {
            errs.push_str("\tthreshold must be 1 or higher\n");
        }
        if self.base.start_rank < 1 {
            errs.push_str("\tstart_rank must be 1 or higher\n");
        } else if self.base.start_rank > self.base.set_size {
            errs.push_str("\tstart_rank must not exceed set_size\n");
        }
        if !self.base.validator_laddr.starts_with("tcp://")
            && !self.base.validator_laddr.starts_with("unix://")
        {
            errs.push_str("\tvalidator_laddr must start with tcp:// or unix://\n");
        }
        if !self.base.validator_laddr_rpc.starts_with("tcp://") {
            errs.push_str("\tvalidator_laddr_rpc must start with tcp://\n");
        }
        if self.base.retry_dial_after.is_zero() {
            errs.push_str("\tretry_dial_after must be a non-zero duration\n");
        }
        if self.privval.chain_id.is_empty() {
            errs.push_str("\tchain_id must not be empty\n");
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid(errs))
        }
    }
}

/// Loads and validates the configuration from `config.toml` in the given
/// directory. Values can be overridden through `SIGNCTRL__`-prefixed
/// environment variables.
pub fn load_config(config_dir: impl AsRef<Path>) -> Result<Config, Error> {
    let path = config_dir.as_ref().join(CONFIG_FILE);

    let config: Config = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("SIGNCTRL").separator("__"))
        .build()?
        .try_deserialize()?;

    config.validate()?;
    Ok(config)
}

/// Resolves the configuration directory: `SIGNCTRL_CONFIG_DIR` if set, then
/// `$HOME/.signctrl`, then the current directory.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(DEFAULT_DIR),
        None => PathBuf::from("."),
    }
}
