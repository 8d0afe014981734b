//! The commented `config.toml` skeleton written by `signctrl init`.

use std::fs;
use std::io;
use std::path::Path;

use crate::CONFIG_FILE;

/// Template written on `init`. Every option carries its default or an
/// example value; operators are expected to adjust the addresses and the
/// chain ID before the first start.
pub const CONFIG_TEMPLATE: &str = r#"# SignCTRL configuration.

[base]
# Minimum log level for SignCTRL logs (DEBUG, INFO, WARN, ERR).
log_level = "INFO"

# Fixed number of replicas sharing the validator identity.
# Must be identical across all replicas of the set.
set_size = 2

# Number of consecutive missed block signatures that triggers a rank update.
threshold = 10

# Rank used on the very first start of this replica.
# Exactly one replica of the set starts at rank 1.
start_rank = 1

# Address of the validator's privval listener to dial.
# Either tcp://host:port or unix:///path.sock.
validator_laddr = "tcp://127.0.0.1:3000"

# Address of the validator's RPC endpoint, used to look up commits.
validator_laddr_rpc = "tcp://127.0.0.1:26657"

# Inactivity timeout and dial-retry interval. Accepts s, m and h suffixes.
retry_dial_after = "15s"

[privval]
# Chain ID this signer is willing to sign for. Required.
chain_id = ""
"#;

/// Writes the configuration template into the given directory. An existing
/// `config.toml` is left untouched.
pub fn write_template(config_dir: &Path) -> io::Result<bool> {
    let path = config_dir.join(CONFIG_FILE);
    if path.exists() {
        return Ok(false);
    }

    fs::write(path, CONFIG_TEMPLATE)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_is_valid_toml() {
        // The template must parse structurally; it is not a *valid* config
        // until the operator fills in the chain ID.
        let parsed: toml::Value = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert!(parsed.get("base").is_some());
        assert!(parsed.get("privval").is_some());
    }

    #[test]
    fn write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        assert!(write_template(dir.path()).unwrap());
        fs::write(dir.path().join(CONFIG_FILE), "custom").unwrap();
        assert!(!write_template(dir.path()).unwrap());
        assert_eq!(
            fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap(),
            "custom"
        );
    }
}
