//! Errors surfaced by wallet operations (§4.9). These are all
//! configuration-level rejections (§7 "surface to the CLI and continue"),
//! never fatal.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("unknown identity {0:?}")]
    UnknownIdentity(String),
    #[error("identity {0:?} has no signing key and cannot spend")]
    NoSigningKey(String),
    #[error("insufficient funds: have {available}, need {requested}")]
    InsufficientFunds { available: i64, requested: i64 },
}
