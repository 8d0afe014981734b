//! The `signctrl_state.json` file. It records the height and rank the
//! replica last held so that a restart resumes from the exact same
//! signing-permission position.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

/// Full file name of the persisted state file.
pub const STATE_FILE: &str = "signctrl_state.json";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("couldn't access {STATE_FILE}: {0}")]
    Io(#[from] io::Error),

    #[error("couldn't parse {STATE_FILE}: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {STATE_FILE}:\n{0}")]
    Invalid(String),

    #[error("couldn't persist {STATE_FILE}: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Contents of the `signctrl_state.json` file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub last_height: i64,
    pub last_rank: u32,
}

impl State {
    fn validate(&self) -> Result<(), StateError> {
        let mut errs = String::new();
        if self.last_height < 1 {
            errs.push_str("\tlast_height must be 1 or higher\n");
        }
        if self.last_rank < 1 {
            errs.push_str("\tlast_rank must be 1 or higher\n");
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(StateError::Invalid(errs))
        }
    }
}

/// Absolute path to the state file inside the configuration directory.
pub fn state_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(STATE_FILE)
}

/// Loads the persisted state, or synthesizes and writes the first-start
/// state if the file does not exist yet. A replica that has never run
/// starts at the configured `start_rank` and height 1; once a state file
/// exists, it wins over the configuration.
pub fn load_or_generate(config_dir: &Path, start_rank: u32) -> Result<State, StateError> {
    let path = state_file_path(config_dir);

    if !path.exists() {
        debug!(path = %path.display(), start_rank, "No state file found, generating one");
        let state = State {
            last_height: 1,
            last_rank: start_rank,
        };
        save(config_dir, &state)?;
        return Ok(state);
    }

    let state: State = serde_json::from_str(&fs::read_to_string(&path)?)?;
    state.validate()?;

    Ok(state)
}

/// Atomically overwrites the state file: the new contents are written to a
/// temporary sibling, fsynced and renamed into place. File mode is owner
/// read/write only where the platform supports it.
pub fn save(config_dir: &Path, state: &State) -> Result<(), StateError> {
    state.validate()?;

    let tmp = NamedTempFile::new_in(config_dir)?;
    serde_json::to_writer_pretty(&tmp, state)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    tmp.persist(state_file_path(config_dir))?;
    Ok(())
}
