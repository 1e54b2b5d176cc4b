//! Error types for the bitebi protocol's wire and script layers.

use thiserror::Error;

/// Errors raised while decoding the binary wire format (§4.1).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: wanted {wanted} bytes, had {available}")]
    UnexpectedEof { wanted: usize, available: usize },
    #[error("non-canonical compact integer encoding")]
    MalformedCompactInt,
    #[error("sequence length {0} exceeds the configured maximum")]
    SequenceTooLarge(u64),
    #[error("trailing bytes after decoding a complete value")]
    TrailingBytes,
}

/// Errors raised by the script evaluator (§4.4).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("RETURN encountered")]
    EarlyReturn,
    #[error("EQUALVERIFY failed")]
    EqualVerifyFailed,
    #[error("VERIFY failed: top of stack was falsy")]
    VerifyFailed,
    #[error("CHECKSIG: malformed public key")]
    MalformedPublicKey,
    #[error("CHECKMULTISIG: malformed count operand")]
    MalformedMultisigCount,
    #[error("final stack was empty or falsy")]
    NotSatisfied,
}
