//! Varint-length-delimited protobuf framing for `privval.Message`, matching
//! Tendermint's delimited reader/writer.

use bytes::{Buf, BytesMut};
use prost::Message as _;
use signctrl_types::proto;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum size of a single frame (payload plus length prefix is rejected
/// beyond this).
pub const MAX_FRAME_SIZE: usize = 10 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame of {0} bytes exceeds the maximum of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge(usize),

    #[error("couldn't decode message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("couldn't encode message: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Codec for the privval wire protocol: each frame is one `privval.Message`
/// prefixed with its varint-encoded length.
#[derive(Debug, Default)]
pub struct PrivvalCodec;

/// Reads the length prefix without consuming `src`. Returns the payload
/// length and the width of the prefix, or `None` if more bytes are needed.
fn peek_length_prefix(src: &BytesMut) -> Result<Option<(usize, usize)>, CodecError> {
    let mut buf = &src[..];
    let available = buf.remaining();

    match prost::encoding::decode_varint(&mut buf) {
        Ok(len) => Ok(Some((len as usize, available - buf.remaining()))),
        // A varint is at most 10 bytes; with fewer available the prefix may
        // simply be incomplete.
        Err(_) if available < 10 => Ok(None),
        Err(err) => Err(err.into()),
    }
}

impl Decoder for PrivvalCodec {
    type Item = proto::Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((len, prefix_len)) = peek_length_prefix(src)? else {
            return Ok(None);
        };

        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(len));
        }

        if src.len() < prefix_len + len {
            src.reserve(prefix_len + len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let frame = src.split_to(len).freeze();
        Ok(Some(proto::Message::decode(frame)?))
    }
}

impl Encoder<proto::Message> for PrivvalCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: proto::Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = msg.encoded_len();
        if len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(len));
        }

        dst.reserve(len + prost::length_delimiter_len(len));
        msg.encode_length_delimited(dst)?;
        Ok(())
    }
}
