//! File-based signing backend: the validator keypair in
//! `priv_validator_key.json` and the last-sign state in
//! `priv_validator_state.json`. The state file is what prevents this process
//! from ever signing two different payloads for the same height, round and
//! step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signer as _, SigningKey};
use prost::Message as _;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use signctrl_types::proto;
use tempfile::NamedTempFile;
use tracing::debug;

/// Tendermint's default file name for the validator keys.
pub const KEY_FILE: &str = "priv_validator_key.json";

/// Tendermint's default file name for the validator's sign state.
pub const STATE_FILE: &str = "priv_validator_state.json";

const STEP_PROPOSE: u8 = 1;
const STEP_PREVOTE: u8 = 2;
const STEP_PRECOMMIT: u8 = 3;

#[derive(Debug, thiserror::Error)]
pub enum FilePvError {
    #[error("couldn't access signing backend files: {0}")]
    Io(#[from] io::Error),

    #[error("couldn't parse signing backend files: {0}")]
    Json(#[from] serde_json::Error),

    #[error("couldn't persist sign state: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("invalid key material in {KEY_FILE}: {0}")]
    InvalidKey(String),

    #[error("unknown sign request type {0}")]
    UnknownType(i32),

    #[error("height regression: last signed {last_height}/{last_round}/{last_step}, got {height}/{round}/{step}")]
    Regression {
        last_height: i64,
        last_round: i32,
        last_step: u8,
        height: i64,
        round: i32,
        step: u8,
    },

    #[error("conflicting data: a different payload was already signed for height {height}, round {round}, step {step}")]
    ConflictingData { height: i64, round: i32, step: u8 },
}

#[derive(Debug, Serialize, Deserialize)]
struct TypedKey {
    #[serde(rename = "type")]
    type_tag: String,
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    address: String,
    pub_key: TypedKey,
    priv_key: TypedKey,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct LastSignState {
    height: i64,
    round: i32,
    step: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_bytes: Option<String>,
}

/// The file-backed private validator. Owns the ed25519 key and the
/// anti-double-sign state.
pub struct FilePv {
    signing_key: SigningKey,
    address: [u8; 20],
    state: LastSignState,
    state_path: PathBuf,
}

fn step_for(msg_type: i32) -> Result<u8, FilePvError> {
    match proto::SignedMsgType::try_from(msg_type) {
        Ok(proto::SignedMsgType::Proposal) => Ok(STEP_PROPOSE),
        Ok(proto::SignedMsgType::Prevote) => Ok(STEP_PREVOTE),
        Ok(proto::SignedMsgType::Precommit) => Ok(STEP_PRECOMMIT),
        _ => Err(FilePvError::UnknownType(msg_type)),
    }
}

/// Tendermint-style address: the first 20 bytes of SHA-256 over the raw
/// ed25519 public key.
fn address_of(key: &SigningKey) -> [u8; 20] {
    let digest = Sha256::digest(key.verifying_key().as_bytes());
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    address
}

impl FilePv {
    /// Loads the key and state files from the configuration directory, or
    /// generates a fresh keypair (and zeroed state) on first use.
    pub fn load_or_generate(config_dir: &Path) -> Result<Self, FilePvError> {
        let key_path = config_dir.join(KEY_FILE);
        let state_path = config_dir.join(STATE_FILE);

        let signing_key = if key_path.exists() {
            let file: KeyFile = serde_json::from_str(&fs::read_to_string(&key_path)?)?;
            let bytes = BASE64
                .decode(file.priv_key.value)
                .map_err(|e| FilePvError::InvalidKey(e.to_string()))?;
            let bytes: [u8; 64] = bytes
                .try_into()
                .map_err(|rest: Vec<u8>| {
                    FilePvError::InvalidKey(format!("expected 64 key bytes, got {}", rest.len()))
                })?;
            SigningKey::from_keypair_bytes(&bytes)
                .map_err(|e| FilePvError::InvalidKey(e.to_string()))?
        } else {
            debug!(path = %key_path.display(), "Generating validator keypair");
            let key = SigningKey::generate(&mut OsRng);
            write_key_file(&key_path, &key)?;
            key
        };

        let state = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            let state = LastSignState::default();
            write_state_file(&state_path, &state)?;
            state
        };

        Ok(Self {
            address: address_of(&signing_key),
            signing_key,
            state,
            state_path,
        })
    }

    /// Raw ed25519 public key bytes.
    pub fn pub_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The validator address derived from the public key. This is the value
    /// looked up in commit signature lists.
    pub fn address(&self) -> &[u8; 20] {
        &self.address
    }

    /// Signs the vote in place, filling in its `signature` field.
    pub fn sign_vote(&mut self, chain_id: &str, vote: &mut proto::Vote) -> Result<(), FilePvError> {
        let step = step_for(vote.r#type)?;
        let sign_bytes = proto::vote_sign_bytes(chain_id, vote);

        if let Some(resolution) =
            self.check_hrs(vote.height, vote.round, step, &sign_bytes, true)?
        {
            vote.signature = resolution.signature.into();
            if let Some(timestamp) = resolution.timestamp {
                vote.timestamp = Some(timestamp);
            }
            return Ok(());
        }

        let signature = self.signing_key.sign(&sign_bytes).to_bytes().to_vec();
        self.persist(vote.height, vote.round, step, &signature, &sign_bytes)?;
        vote.signature = signature.into();
        Ok(())
    }

    /// Signs the proposal in place, filling in its `signature` field.
    pub fn sign_proposal(
        &mut self,
        chain_id: &str,
        proposal: &mut proto::Proposal,
    ) -> Result<(), FilePvError> {
        let step = step_for(proposal.r#type)?;
        let sign_bytes = proto::proposal_sign_bytes(chain_id, proposal);

        if let Some(resolution) =
            self.check_hrs(proposal.height, proposal.round, step, &sign_bytes, false)?
        {
            proposal.signature = resolution.signature.into();
            if let Some(timestamp) = resolution.timestamp {
                proposal.timestamp = Some(timestamp);
            }
            return Ok(());
        }

        let signature = self.signing_key.sign(&sign_bytes).to_bytes().to_vec();
        self.persist(proposal.height, proposal.round, step, &signature, &sign_bytes)?;
        proposal.signature = signature.into();
        Ok(())
    }

    /// Enforces the monotonic height/round/step rule. Returns a cached
    /// resolution for benign repeats (identical payload, or a payload that
    /// differs only in its timestamp), an error for regressions and
    /// conflicts, and `None` when the request is for fresh ground.
    fn check_hrs(
        &self,
        height: i64,
        round: i32,
        step: u8,
        sign_bytes: &[u8],
        is_vote: bool,
    ) -> Result<Option<CachedSign>, FilePvError> {
        let last = &self.state;

        let same = (height, round, step) == (last.height, last.round, last.step);
        let behind = (height, round, step) < (last.height, last.round, last.step);

        if behind {
            return Err(FilePvError::Regression {
                last_height: last.height,
                last_round: last.round,
                last_step: last.step,
                height,
                round,
                step,
            });
        }

        if !same {
            return Ok(None);
        }

        let (Some(cached_sig), Some(cached_bytes)) = (&last.signature, &last.sign_bytes) else {
            return Ok(None);
        };

        let cached_sig = BASE64
            .decode(cached_sig)
            .map_err(|e| FilePvError::InvalidKey(e.to_string()))?;
        let cached_bytes = hex::decode(cached_bytes)
            .map_err(|e| FilePvError::InvalidKey(e.to_string()))?;

        if cached_bytes == sign_bytes {
            return Ok(Some(CachedSign {
                signature: cached_sig,
                timestamp: None,
            }));
        }

        if is_vote {
            if let Some(timestamp) = timestamp_only_difference(&cached_bytes, sign_bytes) {
                return Ok(Some(CachedSign {
                    signature: cached_sig,
                    timestamp: Some(timestamp),
                }));
            }
        }

        Err(FilePvError::ConflictingData {
            height,
            round,
            step,
        })
    }

    fn persist(
        &mut self,
        height: i64,
        round: i32,
        step: u8,
        signature: &[u8],
        sign_bytes: &[u8],
    ) -> Result<(), FilePvError> {
        self.state = LastSignState {
            height,
            round,
            step,
            signature: Some(BASE64.encode(signature)),
            sign_bytes: Some(hex::encode(sign_bytes)),
        };
        write_state_file(&self.state_path, &self.state)
    }
}

struct CachedSign {
    signature: Vec<u8>,
    timestamp: Option<prost_types::Timestamp>,
}

/// If the two canonical vote encodings agree on everything but the
/// timestamp, returns the previously signed timestamp.
fn timestamp_only_difference(
    cached: &[u8],
    requested: &[u8],
) -> Option<prost_types::Timestamp> {
    let mut old = proto::CanonicalVote::decode_length_delimited(cached).ok()?;
    let mut new = proto::CanonicalVote::decode_length_delimited(requested).ok()?;

    let old_timestamp = old.timestamp.take();
    new.timestamp.take();

    (old == new).then_some(old_timestamp).flatten()
}

fn write_key_file(path: &Path, key: &SigningKey) -> Result<(), FilePvError> {
    let file = KeyFile {
        address: hex::encode_upper(address_of(key)),
        pub_key: TypedKey {
            type_tag: "tendermint/PubKeyEd25519".into(),
            value: BASE64.encode(key.verifying_key().as_bytes()),
        },
        priv_key: TypedKey {
            type_tag: "tendermint/PrivKeyEd25519".into(),
            value: BASE64.encode(key.to_keypair_bytes()),
        },
    };

    fs::write(path, serde_json::to_string_pretty(&file)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn write_state_file(path: &Path, state: &LastSignState) -> Result<(), FilePvError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&tmp, state)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
