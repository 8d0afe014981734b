//! The SignCTRL signer core: the file-based signing backend, the request
//! handler that guards every signature behind the rank discipline, the run
//! loop binding it all to the validator, and the local status endpoint.

pub mod commit;
pub mod file_pv;
pub mod handler;
pub mod http;
pub mod service;

pub use commit::{CommitSource, HttpCommitSource};
pub use file_pv::{FilePv, FilePvError};
pub use handler::Fatal;
pub use http::{get_status, Status, DEFAULT_HTTP_PORT};
pub use service::{Handle, Outcome, SignCtrl};
