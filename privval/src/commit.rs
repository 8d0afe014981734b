//! Seam between the request handler and the chain node: something that can
//! produce the commit signatures carried by a block.

use async_trait::async_trait;
use signctrl_rpc::{query_block, CommitSig, RpcError};

/// Source of commit signatures, by block height.
#[async_trait]
pub trait CommitSource: Send + Sync {
    async fn signatures(&self, height: i64) -> Result<Vec<CommitSig>, RpcError>;
}

/// The real thing: queries the validator's RPC endpoint.
pub struct HttpCommitSource {
    client: reqwest::Client,
    rpc_laddr: String,
}

impl HttpCommitSource {
    pub fn new(rpc_laddr: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_laddr: rpc_laddr.into(),
        }
    }
}

#[async_trait]
impl CommitSource for HttpCommitSource {
    async fn signatures(&self, height: i64) -> Result<Vec<CommitSig>, RpcError> {
        let block = query_block(&self.client, &self.rpc_laddr, height).await?;
        Ok(block.last_commit.signatures)
    }
}

/// Whether the given validator address signed within the provided commit
/// signatures. Entries without a signature are absentees.
pub fn has_signed(address: &[u8], signatures: &[CommitSig]) -> bool {
    signatures
        .iter()
        .any(|sig| sig.validator_address == address && sig.signature.is_some())
}
