//! Hand-modeled subset of the Tendermint v0.34 protobuf definitions that the
//! remote-signer wire protocol is made of: the `privval.Message` oneof, the
//! vote/proposal payloads and the canonical forms used for sign bytes.
//!
//! Field numbers and types follow `privval.proto`, `types.proto`,
//! `canonical.proto` and `keys.proto` so that frames are byte-compatible with
//! a validator speaking the upstream protocol.

use prost::bytes::Bytes;
use prost::Message as _;

/// Vote/proposal discriminator. Values are wire values, not sequential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SignedMsgType {
    Unknown = 0,
    Prevote = 1,
    Precommit = 2,
    Proposal = 32,
}

impl SignedMsgType {
    /// Human-readable name used in log lines and error descriptions.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
            Self::Proposal => "proposal",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartSetHeader {
    #[prost(uint32, tag = "1")]
    pub total: u32,
    #[prost(bytes = "bytes", tag = "2")]
    pub hash: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockId {
    #[prost(bytes = "bytes", tag = "1")]
    pub hash: Bytes,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<PartSetHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vote {
    #[prost(enumeration = "SignedMsgType", tag = "1")]
    pub r#type: i32,
    #[prost(int64, tag = "2")]
    pub height: i64,
    #[prost(int32, tag = "3")]
    pub round: i32,
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<BlockId>,
    #[prost(message, optional, tag = "5")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(bytes = "bytes", tag = "6")]
    pub validator_address: Bytes,
    #[prost(int32, tag = "7")]
    pub validator_index: i32,
    #[prost(bytes = "bytes", tag = "8")]
    pub signature: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Proposal {
    #[prost(enumeration = "SignedMsgType", tag = "1")]
    pub r#type: i32,
    #[prost(int64, tag = "2")]
    pub height: i64,
    #[prost(int32, tag = "3")]
    pub round: i32,
    #[prost(int32, tag = "4")]
    pub pol_round: i32,
    #[prost(message, optional, tag = "5")]
    pub block_id: Option<BlockId>,
    #[prost(message, optional, tag = "6")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(bytes = "bytes", tag = "7")]
    pub signature: Bytes,
}

/// `tendermint.crypto.PublicKey` oneof. Only ed25519 keys are produced by
/// this signer; the secp256k1 arm exists for wire compatibility.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublicKey {
    #[prost(oneof = "public_key::Sum", tags = "1, 2")]
    pub sum: Option<public_key::Sum>,
}

pub mod public_key {
    use prost::bytes::Bytes;

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Sum {
        #[prost(bytes = "bytes", tag = "1")]
        Ed25519(Bytes),
        #[prost(bytes = "bytes", tag = "2")]
        Secp256k1(Bytes),
    }
}

impl PublicKey {
    pub fn ed25519(key: impl Into<Bytes>) -> Self {
        Self {
            sum: Some(public_key::Sum::Ed25519(key.into())),
        }
    }
}

/// How the signer declines a request without breaking the stream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoteSignerError {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub description: String,
}

impl RemoteSignerError {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            code: 0,
            description: description.into(),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PubKeyRequest {
    #[prost(string, tag = "1")]
    pub chain_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PubKeyResponse {
    #[prost(message, optional, tag = "1")]
    pub pub_key: Option<PublicKey>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<RemoteSignerError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignVoteRequest {
    #[prost(message, optional, tag = "1")]
    pub vote: Option<Vote>,
    #[prost(string, tag = "2")]
    pub chain_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedVoteResponse {
    #[prost(message, optional, tag = "1")]
    pub vote: Option<Vote>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<RemoteSignerError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignProposalRequest {
    #[prost(message, optional, tag = "1")]
    pub proposal: Option<Proposal>,
    #[prost(string, tag = "2")]
    pub chain_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedProposalResponse {
    #[prost(message, optional, tag = "1")]
    pub proposal: Option<Proposal>,
    #[prost(message, optional, tag = "2")]
    pub error: Option<RemoteSignerError>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {}

/// Top-level `privval.Message` envelope carried in every frame.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(oneof = "message::Sum", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub sum: Option<message::Sum>,
}

pub mod message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Sum {
        #[prost(message, tag = "1")]
        PubKeyRequest(super::PubKeyRequest),
        #[prost(message, tag = "2")]
        PubKeyResponse(super::PubKeyResponse),
        #[prost(message, tag = "3")]
        SignVoteRequest(super::SignVoteRequest),
        #[prost(message, tag = "4")]
        SignedVoteResponse(super::SignedVoteResponse),
        #[prost(message, tag = "5")]
        SignProposalRequest(super::SignProposalRequest),
        #[prost(message, tag = "6")]
        SignedProposalResponse(super::SignedProposalResponse),
        #[prost(message, tag = "7")]
        PingRequest(super::PingRequest),
        #[prost(message, tag = "8")]
        PingResponse(super::PingResponse),
    }
}

impl Message {
    pub fn wrap(sum: message::Sum) -> Self {
        Self { sum: Some(sum) }
    }
}

impl From<PingResponse> for Message {
    fn from(msg: PingResponse) -> Self {
        Self::wrap(message::Sum::PingResponse(msg))
    }
}

impl From<PubKeyResponse> for Message {
    fn from(msg: PubKeyResponse) -> Self {
        Self::wrap(message::Sum::PubKeyResponse(msg))
    }
}

impl From<SignedVoteResponse> for Message {
    fn from(msg: SignedVoteResponse) -> Self {
        Self::wrap(message::Sum::SignedVoteResponse(msg))
    }
}

impl From<SignedProposalResponse> for Message {
    fn from(msg: SignedProposalResponse) -> Self {
        Self::wrap(message::Sum::SignedProposalResponse(msg))
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanonicalPartSetHeader {
    #[prost(uint32, tag = "1")]
    pub total: u32,
    #[prost(bytes = "bytes", tag = "2")]
    pub hash: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanonicalBlockId {
    #[prost(bytes = "bytes", tag = "1")]
    pub hash: Bytes,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<CanonicalPartSetHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanonicalVote {
    #[prost(enumeration = "SignedMsgType", tag = "1")]
    pub r#type: i32,
    #[prost(sfixed64, tag = "2")]
    pub height: i64,
    #[prost(sfixed64, tag = "3")]
    pub round: i64,
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<CanonicalBlockId>,
    #[prost(message, optional, tag = "5")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(string, tag = "6")]
    pub chain_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CanonicalProposal {
    #[prost(enumeration = "SignedMsgType", tag = "1")]
    pub r#type: i32,
    #[prost(sfixed64, tag = "2")]
    pub height: i64,
    #[prost(sfixed64, tag = "3")]
    pub round: i64,
    #[prost(int64, tag = "4")]
    pub pol_round: i64,
    #[prost(message, optional, tag = "5")]
    pub block_id: Option<CanonicalBlockId>,
    #[prost(message, optional, tag = "6")]
    pub timestamp: Option<::prost_types::Timestamp>,
    #[prost(string, tag = "7")]
    pub chain_id: String,
}

fn canonicalize_block_id(block_id: Option<&BlockId>) -> Option<CanonicalBlockId> {
    block_id.map(|bid| CanonicalBlockId {
        hash: bid.hash.clone(),
        part_set_header: bid.part_set_header.as_ref().map(|psh| CanonicalPartSetHeader {
            total: psh.total,
            hash: psh.hash.clone(),
        }),
    })
}

/// Canonical, length-delimited sign bytes for a vote. This is the byte string
/// the validator set's signatures commit to.
pub fn vote_sign_bytes(chain_id: &str, vote: &Vote) -> Vec<u8> {
    CanonicalVote {
        r#type: vote.r#type,
        height: vote.height,
        round: i64::from(vote.round),
        block_id: canonicalize_block_id(vote.block_id.as_ref()),
        timestamp: vote.timestamp.clone(),
        chain_id: chain_id.to_owned(),
    }
    .encode_length_delimited_to_vec()
}

/// Canonical, length-delimited sign bytes for a proposal.
pub fn proposal_sign_bytes(chain_id: &str, proposal: &Proposal) -> Vec<u8> {
    CanonicalProposal {
        r#type: proposal.r#type,
        height: proposal.height,
        round: i64::from(proposal.round),
        pol_round: i64::from(proposal.pol_round),
        block_id: canonicalize_block_id(proposal.block_id.as_ref()),
        timestamp: proposal.timestamp.clone(),
        chain_id: chain_id.to_owned(),
    }
    .encode_length_delimited_to_vec()
}

#[cfg(test)]
mod tests {
    use prost::Message as _;

    use super::*;

    fn sample_vote() -> Vote {
        Vote {
            r#type: SignedMsgType::Precommit as i32,
            height: 42,
            round: 0,
            block_id: Some(BlockId {
                hash: Bytes::from_static(&[0xAB; 32]),
                part_set_header: Some(PartSetHeader {
                    total: 1,
                    hash: Bytes::from_static(&[0xCD; 32]),
                }),
            }),
            timestamp: Some(::prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
            validator_address: Bytes::from_static(&[0x01; 20]),
            validator_index: 3,
            signature: Bytes::new(),
        }
    }

    #[test]
    fn message_envelope_round_trips() {
        let msg = Message::wrap(message::Sum::SignVoteRequest(SignVoteRequest {
            vote: Some(sample_vote()),
            chain_id: "testchain".into(),
        }));

        let bytes = msg.encode_length_delimited_to_vec();
        let decoded = Message::decode_length_delimited(bytes.as_slice()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn sign_bytes_depend_on_chain_id() {
        let vote = sample_vote();
        assert_ne!(
            vote_sign_bytes("chain-a", &vote),
            vote_sign_bytes("chain-b", &vote),
        );
    }

    #[test]
    fn sign_bytes_change_with_timestamp() {
        let vote = sample_vote();
        let mut shifted = vote.clone();
        shifted.timestamp = Some(::prost_types::Timestamp {
            seconds: 1_700_000_001,
            nanos: 0,
        });
        assert_ne!(
            vote_sign_bytes("c", &vote),
            vote_sign_bytes("c", &shifted),
        );
    }
}
