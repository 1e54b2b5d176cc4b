//! Wire-level errors for the peer layer (§4.8, §7 "Wire errors").
//!
//! Every variant here is a reason to close the offending connection and
//! keep serving everyone else — none of these are fatal.

use thiserror::Error;

use bitebi_core::CodecError;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("frame has wrong start string")]
    BadMagic,
    #[error("frame payload length {0} exceeds the configured maximum")]
    PayloadTooLarge(u64),
    #[error("frame checksum mismatch")]
    ChecksumMismatch,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
