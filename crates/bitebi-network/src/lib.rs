//! # bitebi-network
//! The peer gossip layer (§4.8): bit-exact framing, per-connection
//! dispatch, block synchronization, address gossip, and broadcast.

mod config;
mod error;
mod frame;
mod message;
mod peer;
mod sync;

pub use config::NetworkConfig;
pub use error::NetworkError;
pub use frame::Frame;
pub use message::{AddrEntry, InvItem, InvType, Message};
pub use peer::Peer;
pub use sync::{answer_getblocks, build_locator};
