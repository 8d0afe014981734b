//! The `conn.key` file: the long-term ed25519 keypair identifying this
//! SignCTRL process towards the validator's listener.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// Full file name of the connection key.
pub const CONN_KEY_FILE: &str = "conn.key";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("couldn't access {CONN_KEY_FILE}: {0}")]
    Io(#[from] io::Error),

    #[error("couldn't decode {CONN_KEY_FILE}: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{CONN_KEY_FILE} must hold a 64-byte ed25519 keypair, got {0} bytes")]
    InvalidLength(usize),

    #[error("invalid keypair in {CONN_KEY_FILE}: {0}")]
    Keypair(#[from] ed25519_dalek::SignatureError),
}

/// Absolute path to the connection key file.
pub fn conn_key_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONN_KEY_FILE)
}

/// Loads the base64-encoded 64-byte keypair from the configuration
/// directory.
pub fn load_conn_key(config_dir: &Path) -> Result<SigningKey, KeyError> {
    let encoded = fs::read_to_string(conn_key_path(config_dir))?;
    let bytes = BASE64.decode(encoded.trim())?;

    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|rest: Vec<u8>| KeyError::InvalidLength(rest.len()))?;

    Ok(SigningKey::from_keypair_bytes(&bytes)?)
}

/// Generates a fresh connection key unless one already exists. Returns
/// whether a new key was written.
pub fn generate_conn_key(config_dir: &Path) -> Result<bool, KeyError> {
    let path = conn_key_path(config_dir);
    if path.exists() {
        return Ok(false);
    }

    let key = SigningKey::generate(&mut OsRng);
    fs::write(&path, BASE64.encode(key.to_keypair_bytes()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();

        assert!(generate_conn_key(dir.path()).unwrap());
        let key = load_conn_key(dir.path()).unwrap();

        // Generating again must not clobber the existing identity.
        assert!(!generate_conn_key(dir.path()).unwrap());
        let reloaded = load_conn_key(dir.path()).unwrap();
        assert_eq!(key.to_keypair_bytes(), reloaded.to_keypair_bytes());
    }

    #[test]
    fn rejects_truncated_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(conn_key_path(dir.path()), BASE64.encode([7u8; 32])).unwrap();

        assert!(matches!(
            load_conn_key(dir.path()),
            Err(KeyError::InvalidLength(32))
        ));
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(conn_key_path(dir.path()), "not base64 at all!").unwrap();

        assert!(matches!(
            load_conn_key(dir.path()),
            Err(KeyError::Base64(_))
        ));
    }

    #[test]
    fn missing_key_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_conn_key(dir.path()), Err(KeyError::Io(_))));
    }
}
