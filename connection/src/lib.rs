//! Connection plumbing between SignCTRL and the validator: the process
//! identity key, the length-delimited privval framing and the cancelable
//! retry dialer.

pub mod codec;
pub mod dial;
pub mod key;

pub use codec::{CodecError, PrivvalCodec, MAX_FRAME_SIZE};
pub use dial::{retry_dial, Conn, DialError, FramedConn};
pub use key::{conn_key_path, generate_conn_key, load_conn_key, KeyError, CONN_KEY_FILE};
