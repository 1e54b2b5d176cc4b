//! The chain engine's notification seam to external collaborators (§4.5,
//! §9: "cyclic back-references... should be broken by passing the chain to
//! wallet/peer/orphans explicitly"). The wallet never holds a reference
//! back into [`crate::state::Chain`]; instead it registers itself as an
//! observer and is called synchronously while the chain mutex is held.

use bitebi_core::{Block, Transaction};

/// Invoked by [`crate::state::Chain::add_transaction`] for every
/// newly-seen transaction, while the chain mutex is held. Implementors
/// must not call back into `Chain` (§5 hazard: "wallet mutations must not
/// re-enter chain APIs that also take the mutex").
pub trait TransactionObserver: Send + Sync {
    fn observe(&self, tx: &Transaction);
}

/// The miner's notification seam to the peer layer (§4.7: "a reference to
/// the peer for broadcasting"). Lives here, rather than in the miner or
/// network crate, so that neither needs to depend on the other: the
/// network crate implements it on its connection-set type, the miner
/// crate only ever sees `Arc<dyn BlockBroadcaster>`.
pub trait BlockBroadcaster: Send + Sync {
    fn broadcast_block(&self, block: &Block);
}
