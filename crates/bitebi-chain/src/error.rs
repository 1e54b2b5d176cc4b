//! Errors raised by block and transaction verification (§4.5, §7).
//!
//! These are all *rejections*: the submitter's block or transaction is
//! dropped and the chain state is left untouched. Invariant violations
//! (rollback failures, mempool DAG cycles) are not represented here — per
//! §7 they are fatal and handled by [`crate::state::fatal`].

use bitebi_core::ScriptError;
use thiserror::Error;

/// Rejection reasons for [`crate::state::Chain::verify_transaction`] (§4.5).
/// Unlike connect-time double-spend detection (see [`BlockError`]), this
/// check never consults the UTXO spendable flag — it only asks whether the
/// input's referenced output *exists* and whether the script/value math
/// works out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("input {index} references unknown outpoint {outpoint}")]
    UnknownOutpoint { index: usize, outpoint: String },
    #[error("input {index} output index {output_index} is out of range (referenced tx has {max} outputs)")]
    OutputIndexOutOfRange {
        index: usize,
        output_index: u32,
        max: usize,
    },
    #[error("input {index} script evaluation failed: {source}")]
    ScriptFailed { index: usize, source: ScriptError },
    #[error("input {index} script did not authorize the spend")]
    ScriptNotSatisfied { index: usize },
    #[error("sum of inputs ({input_value}) is less than sum of outputs ({output_value})")]
    Underfunded { input_value: i64, output_value: i64 },
    #[error("coinbase must have exactly one input, got {0}")]
    CoinbaseInputCount(usize),
    #[error("coinbase signature_script must be 4 bytes (0x03 || height_le24), got {0} bytes")]
    CoinbaseScriptShape(usize),
    #[error("coinbase signature_script encodes height {got}, expected {expected}")]
    CoinbaseHeightMismatch { got: u32, expected: u32 },
    #[error("coinbase output value {got} exceeds the block subsidy {max}")]
    CoinbaseOverpays { got: i64, max: i64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("chain already extends to or past height {0}")]
    NotExtending(u64),
    #[error("blocks[0].prev_hash does not match the chain tip at start_height - 1")]
    LinkageToTipMismatch,
    #[error("blocks[{0}].prev_hash does not match hash(blocks[{prev}])", prev = .0 - 1)]
    InternalLinkageMismatch(usize),
    #[error("block {0} fails its proof-of-work target")]
    InvalidPow(usize),
    #[error("block {0} merkle_root does not match its transactions")]
    InvalidMerkleRoot(usize),
    #[error("block {0} has no transactions (missing coinbase)")]
    EmptyBlock(usize),
    #[error("block {0} transaction {1}: {2}")]
    TxRejected(usize, usize, TxError),
    #[error("block {0} transaction {1} double-spends an outpoint already consumed earlier in this extension")]
    DoubleSpendOnConnect(usize, usize),
}
