//! JSON-RPC client for the chain node's `/block` endpoint. Only the commit
//! signatures of the returned block are of interest to the signer.

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for block queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("block height {0} does not exist")]
    InvalidHeight(i64),

    #[error("block query failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("block query failed: {message} (code {code})")]
    Server { code: i64, message: String },

    #[error("result block for height {0} is nil")]
    NilResult(i64),
}

/// One entry of a block's commit: which validator signed, and with what.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CommitSig {
    #[serde(default)]
    pub block_id_flag: i32,

    #[serde(default, with = "hex::serde")]
    pub validator_address: Vec<u8>,

    #[serde(default, deserialize_with = "base64_opt")]
    pub signature: Option<Vec<u8>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub signatures: Vec<CommitSig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub last_commit: Commit,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// JSON-RPC 2.0 envelope of the `/block` endpoint.
#[derive(Debug, Deserialize)]
struct BlockEnvelope {
    result: Option<BlockResult>,
    error: Option<ResponseError>,
}

fn base64_opt<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let value = Option::<String>::deserialize(deserializer)?;
    value
        .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Queries the block at the given height and returns it. The in-flight
/// request is aborted by dropping the returned future.
pub async fn query_block(
    client: &reqwest::Client,
    rpc_laddr: &str,
    height: i64,
) -> Result<Block, RpcError> {
    if height < 1 {
        return Err(RpcError::InvalidHeight(height));
    }

    let host = rpc_laddr.strip_prefix("tcp://").unwrap_or(rpc_laddr);
    let url = format!("http://{host}/block?height={height}");
    debug!(%url, "Querying block");

    let envelope: BlockEnvelope = client
        .get(&url)
        .timeout(QUERY_TIMEOUT)
        .send()
        .await?
        .json()
        .await?;

    if let Some(err) = envelope.error {
        return Err(RpcError::Server {
            code: err.code,
            message: err.message,
        });
    }

    envelope
        .result
        .map(|r| r.block)
        .ok_or(RpcError::NilResult(height))
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    async fn serve(response: Value) -> String {
        let app = Router::new().route("/block", get(move || async move { Json(response) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("tcp://{addr}")
    }

    #[tokio::test]
    async fn parses_commit_signatures() {
        let laddr = serve(json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "block_id": { "hash": "00" },
                "block": {
                    "header": { "height": "8" },
                    "last_commit": {
                        "height": "7",
                        "signatures": [
                            {
                                "block_id_flag": 2,
                                "validator_address": "0102030405060708090A0B0C0D0E0F1011121314",
                                "timestamp": "2021-03-01T10:00:00Z",
                                "signature": "c2lnbmF0dXJl"
                            },
                            {
                                "block_id_flag": 1,
                                "validator_address": "",
                                "signature": null
                            }
                        ]
                    }
                }
            }
        }))
        .await;

        let client = reqwest::Client::new();
        let block = query_block(&client, &laddr, 8).await.unwrap();

        let sigs = &block.last_commit.signatures;
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].validator_address[0], 0x01);
        assert_eq!(sigs[0].signature.as_deref(), Some(&b"signature"[..]));
        assert!(sigs[1].signature.is_none());
    }

    #[tokio::test]
    async fn nil_result_is_an_error() {
        let laddr = serve(json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": null
        }))
        .await;

        let client = reqwest::Client::new();
        assert!(matches!(
            query_block(&client, &laddr, 9).await,
            Err(RpcError::NilResult(9))
        ));
    }

    #[tokio::test]
    async fn server_errors_are_surfaced() {
        let laddr = serve(json!({
            "jsonrpc": "2.0",
            "id": -1,
            "error": { "code": -32603, "message": "height 99 must be less than or equal to the current blockchain height" }
        }))
        .await;

        let client = reqwest::Client::new();
        assert!(matches!(
            query_block(&client, &laddr, 99).await,
            Err(RpcError::Server { code: -32603, .. })
        ));
    }

    #[tokio::test]
    async fn rejects_heights_below_one() {
        let client = reqwest::Client::new();
        assert!(matches!(
            query_block(&client, "tcp://127.0.0.1:1", 0).await,
            Err(RpcError::InvalidHeight(0))
        ));
    }

    #[tokio::test]
    async fn unreachable_node_is_an_http_error() {
        let client = reqwest::Client::new();
        assert!(matches!(
            query_block(&client, "tcp://127.0.0.1:1", 3).await,
            Err(RpcError::Http(_))
        ));
    }
}
