//! Core types shared across the SignCTRL crates: the privval wire protocol,
//! the ranked-signer state machine and the prometheus gauges that mirror it.

pub mod gauge;
pub mod proto;
pub mod signer;

pub use gauge::Gauges;
pub use signer::{RankedSigner, SignerError};
