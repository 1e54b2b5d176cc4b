//! # bitebi-core
//! Foundation types and primitives for the bitebi protocol: wire encoding,
//! hashing, proof-of-work, merkle roots, the script evaluator, and the
//! fixed network presets.

pub mod codec;
pub mod constants;
pub mod error;
pub mod genesis;
pub mod hash;
pub mod merkle;
pub mod script;
pub mod types;

pub use error::{CodecError, ScriptError};
pub use types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut};
