//! The request handler: turns one inbound privval message into one outbound
//! message plus an optional fatal outcome for the run loop.
//!
//! For sign requests the checks run strictly in this order: the chain-ID
//! filter, the obsolete-rank check, the per-height commit check (which may
//! itself rotate the rank), the rank gate, and only then the signature.

use std::fmt;

use signctrl_config::Config;
use signctrl_types::proto::{self, message::Sum};
use signctrl_types::{RankedSigner, SignerError};
use tracing::{debug, info, warn};

use crate::commit::{has_signed, CommitSource};
use crate::file_pv::FilePv;

/// The only two conditions under which the signer must stop: silently
/// continuing past either would risk a double-sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fatal {
    /// Rank 1 exhausted its threshold and cannot be demoted safely.
    MustShutdown,
    /// The persisted rank is stale relative to the chain's progress.
    RankObsolete,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MustShutdown => write!(f, "must shutdown"),
            Self::RankObsolete => write!(f, "rank obsolete"),
        }
    }
}

/// A declined sign request: the description goes back to the validator as a
/// `RemoteSignerError`, the fatal marker (if any) stops the service.
struct Refusal {
    description: String,
    fatal: Option<Fatal>,
}

impl Refusal {
    fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            fatal: None,
        }
    }

    fn fatal(description: impl Into<String>, fatal: Fatal) -> Self {
        Self {
            description: description.into(),
            fatal: Some(fatal),
        }
    }
}

fn wrong_chain_id(expected: &str, got: &str) -> Refusal {
    Refusal::new(format!("wrong chain id: expected '{expected}', got '{got}'"))
}

fn no_permission(msg_type: proto::SignedMsgType, height: i64, rank: u32) -> Refusal {
    Refusal::new(format!(
        "no signing permission for {} on height {height} (rank: {rank})",
        msg_type.name(),
    ))
}

/// Handles one inbound message. Panics on message kinds that are not
/// requests, since those indicate a protocol evolution this signer cannot
/// answer safely.
pub async fn handle(
    msg: proto::Message,
    signer: &mut RankedSigner,
    file_pv: &mut FilePv,
    commits: &dyn CommitSource,
    config: &Config,
) -> (proto::Message, Option<Fatal>) {
    match msg.sum {
        Some(Sum::PingRequest(_)) => {
            debug!("Received ping request");
            (proto::PingResponse {}.into(), None)
        }
        Some(Sum::PubKeyRequest(req)) => handle_pub_key_request(req, file_pv, config),
        Some(Sum::SignVoteRequest(req)) => {
            handle_sign_vote_request(req, signer, file_pv, commits, config).await
        }
        Some(Sum::SignProposalRequest(req)) => {
            handle_sign_proposal_request(req, signer, file_pv, commits, config).await
        }
        other => panic!("unknown privval request: {other:?}"),
    }
}

fn handle_pub_key_request(
    req: proto::PubKeyRequest,
    file_pv: &FilePv,
    config: &Config,
) -> (proto::Message, Option<Fatal>) {
    debug!(chain_id = %req.chain_id, "Received pubkey request");

    if req.chain_id != config.privval.chain_id {
        let refusal = wrong_chain_id(&config.privval.chain_id, &req.chain_id);
        return (
            proto::PubKeyResponse {
                pub_key: None,
                error: Some(proto::RemoteSignerError::new(refusal.description)),
            }
            .into(),
            None,
        );
    }

    (
        proto::PubKeyResponse {
            pub_key: Some(proto::PublicKey::ed25519(file_pv.pub_key_bytes().to_vec())),
            error: None,
        }
        .into(),
        None,
    )
}

/// Shared pre-sign pipeline for votes and proposals: the obsolete-rank
/// check, the once-per-height commit check and the rank gate.
async fn pre_sign_checks(
    height: i64,
    msg_type: proto::SignedMsgType,
    signer: &mut RankedSigner,
    file_pv: &FilePv,
    commits: &dyn CommitSource,
) -> Result<(), Refusal> {
    // A rank update must have happened elsewhere without this replica
    // observing it, so its persisted rank cannot be trusted.
    if height - signer.last_height() >= i64::from(signer.threshold()) + 1 {
        warn!(
            height,
            last_height = signer.last_height(),
            threshold = signer.threshold(),
            "Persisted rank is stale"
        );
        return Err(Refusal::fatal(
            format!(
                "rank obsolete: height {height} is more than {} ahead of last height {}",
                signer.threshold(),
                signer.last_height(),
            ),
            Fatal::RankObsolete,
        ));
    }

    // Check the previous block's commit once per height. Height 1 has no
    // previous commit.
    if height > signer.current_height() && height > 1 {
        let signatures = match commits.signatures(height - 1).await {
            Ok(signatures) => signatures,
            // The chain node may be momentarily unreachable; decline the
            // request and let the validator retry.
            Err(err) => return Err(Refusal::new(err.to_string())),
        };

        // Advance before signing so retries at the same height never repeat
        // the commit check.
        signer.set_current_height(height);
        signer.set_last_height(height);

        if has_signed(file_pv.address(), &signatures) {
            signer.reset();
            signer.unlock_counter();
        } else {
            match signer.missed() {
                // A locked counter is the startup grace period: a miss
                // before the first co-signed commit proves nothing.
                Ok(()) | Err(SignerError::CounterLocked) => {}
                Err(SignerError::ThresholdExceeded) => {
                    // The rank rotated just now. The in-flight request is
                    // declined; the first height signed under the new rank
                    // is the one after the skipped block.
                    return Err(no_permission(msg_type, height, signer.rank()));
                }
                Err(err @ SignerError::MustShutdown) => {
                    return Err(Refusal::fatal(err.to_string(), Fatal::MustShutdown));
                }
            }
        }
    }

    if signer.rank() > 1 {
        return Err(no_permission(msg_type, height, signer.rank()));
    }

    Ok(())
}

async fn handle_sign_vote_request(
    req: proto::SignVoteRequest,
    signer: &mut RankedSigner,
    file_pv: &mut FilePv,
    commits: &dyn CommitSource,
    config: &Config,
) -> (proto::Message, Option<Fatal>) {
    let respond = |error: proto::RemoteSignerError, fatal: Option<Fatal>| {
        (
            proto::SignedVoteResponse {
                vote: None,
                error: Some(error),
            }
            .into(),
            fatal,
        )
    };

    let Some(mut vote) = req.vote else {
        return respond(proto::RemoteSignerError::new("empty vote"), None);
    };
    let msg_type = proto::SignedMsgType::try_from(vote.r#type)
        .unwrap_or(proto::SignedMsgType::Unknown);

    debug!(
        r#type = msg_type.name(),
        height = vote.height,
        round = vote.round,
        "Received sign-vote request"
    );

    if req.chain_id != config.privval.chain_id {
        let refusal = wrong_chain_id(&config.privval.chain_id, &req.chain_id);
        return respond(proto::RemoteSignerError::new(refusal.description), None);
    }

    if let Err(refusal) = pre_sign_checks(vote.height, msg_type, signer, file_pv, commits).await
    {
        return respond(
            proto::RemoteSignerError::new(refusal.description),
            refusal.fatal,
        );
    }

    if let Err(err) = file_pv.sign_vote(&config.privval.chain_id, &mut vote) {
        let description = format!(
            "failed to sign {} for height {}: {err}",
            msg_type.name(),
            vote.height,
        );
        return respond(proto::RemoteSignerError::new(description), None);
    }

    info!(r#type = msg_type.name(), height = vote.height, "Signed vote");
    (
        proto::SignedVoteResponse {
            vote: Some(vote),
            error: None,
        }
        .into(),
        None,
    )
}

async fn handle_sign_proposal_request(
    req: proto::SignProposalRequest,
    signer: &mut RankedSigner,
    file_pv: &mut FilePv,
    commits: &dyn CommitSource,
    config: &Config,
) -> (proto::Message, Option<Fatal>) {
    let respond = |error: proto::RemoteSignerError, fatal: Option<Fatal>| {
        (
            proto::SignedProposalResponse {
                proposal: None,
                error: Some(error),
            }
            .into(),
            fatal,
        )
    };

    let Some(mut proposal) = req.proposal else {
        return respond(proto::RemoteSignerError::new("empty proposal"), None);
    };

    debug!(
        height = proposal.height,
        round = proposal.round,
        "Received sign-proposal request"
    );

    if req.chain_id != config.privval.chain_id {
        let refusal = wrong_chain_id(&config.privval.chain_id, &req.chain_id);
        return respond(proto::RemoteSignerError::new(refusal.description), None);
    }

    if let Err(refusal) = pre_sign_checks(
        proposal.height,
        proto::SignedMsgType::Proposal,
        signer,
        file_pv,
        commits,
    )
    .await
    {
        return respond(
            proto::RemoteSignerError::new(refusal.description),
            refusal.fatal,
        );
    }

    if let Err(err) = file_pv.sign_proposal(&config.privval.chain_id, &mut proposal) {
        let description =
            format!("failed to sign proposal for height {}: {err}", proposal.height);
        return respond(proto::RemoteSignerError::new(description), None);
    }

    info!(height = proposal.height, "Signed proposal");
    (
        proto::SignedProposalResponse {
            proposal: Some(proposal),
            error: None,
        }
        .into(),
        None,
    )
}
