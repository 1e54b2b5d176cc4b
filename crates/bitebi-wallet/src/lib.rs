//! # bitebi-wallet
//! The wallet collaborator (§4.9): named ed25519 identities, a per-identity
//! UTXO index maintained via the chain's transaction-observer seam, and
//! naive coin selection for outgoing transfers.

mod error;
mod identity;
mod wallet;

pub use error::WalletError;
pub use identity::KeyMaterial;
pub use wallet::Wallet;
