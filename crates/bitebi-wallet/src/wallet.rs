//! The wallet collaborator (§4.9): named identities, a per-identity UTXO
//! index kept current via [`TransactionObserver::observe`], and naive
//! oldest-first coin selection for outgoing transfers.

use std::collections::HashMap;

use bitebi_chain::TransactionObserver;
use bitebi_core::hash::hash256;
use bitebi_core::{Hash256, OutPoint, Transaction, TxIn, TxOut};
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::WalletError;
use crate::identity::{p2pkh_sig_script, Identity, KeyMaterial};

struct IdentityBook {
    identity: Identity,
    /// Owned, unspent outpoints in the order they were first observed —
    /// oldest first, matching `build_transfer`'s coin selection.
    utxos: Vec<(OutPoint, i64)>,
}

/// Named identities plus the UTXOs they own. Registered against a `Chain`
/// as a [`TransactionObserver`]; every method here only ever touches its
/// own internal locks, never re-entering the chain (§5, §9).
#[derive(Default)]
pub struct Wallet {
    identities: Mutex<HashMap<String, IdentityBook>>,
    pk_script_index: Mutex<HashMap<Hash256, String>>,
    utxo_owner: Mutex<HashMap<OutPoint, String>>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch-only identity (`addpk`): can receive and report a
    /// balance, but `build_transfer` from it always fails.
    pub fn add_pubkey_identity(&self, name: impl Into<String>, key: VerifyingKey) {
        self.add_identity(name, KeyMaterial::Public(key));
    }

    /// Register a spend-capable identity (`addsk`).
    pub fn add_secret_identity(&self, name: impl Into<String>, key: SigningKey) {
        self.add_identity(name, KeyMaterial::Secret(key));
    }

    fn add_identity(&self, name: impl Into<String>, material: KeyMaterial) {
        let name = name.into();
        let identity = Identity::new(material);
        let script_hash = hash256(&identity.pk_script);
        self.pk_script_index.lock().insert(script_hash, name.clone());
        self.identities.lock().insert(
            name,
            IdentityBook {
                identity,
                utxos: Vec::new(),
            },
        );
    }

    pub fn has_identity(&self, name: &str) -> bool {
        self.identities.lock().contains_key(name)
    }

    /// Names of every registered identity, in no particular order.
    pub fn identity_names(&self) -> Vec<String> {
        self.identities.lock().keys().cloned().collect()
    }

    /// The P2PKH script an identity's outputs are paid to, e.g. to use as
    /// a mining reward destination. `None` if no such identity is registered.
    pub fn pk_script(&self, name: &str) -> Option<Vec<u8>> {
        self.identities
            .lock()
            .get(name)
            .map(|book| book.identity.pk_script.clone())
    }

    /// Sum of an identity's currently-unspent, observed outputs. `None` if
    /// no such identity is registered.
    pub fn balance(&self, name: &str) -> Option<i64> {
        self.identities
            .lock()
            .get(name)
            .map(|book| book.utxos.iter().map(|(_, value)| value).sum())
    }

    /// Build and sign a transaction spending `from`'s oldest unspent
    /// outputs to pay `to` (also a registered identity), with any
    /// remainder returned to `from` as change (§4.9: "no fee concept").
    pub fn build_transfer(
        &self,
        from: &str,
        to: &str,
        amount: i64,
    ) -> Result<Transaction, WalletError> {
        let identities = self.identities.lock();
        let from_book = identities
            .get(from)
            .ok_or_else(|| WalletError::UnknownIdentity(from.to_string()))?;
        let to_book = identities
            .get(to)
            .ok_or_else(|| WalletError::UnknownIdentity(to.to_string()))?;
        let signing_key = from_book
            .identity
            .signing_key
            .as_ref()
            .ok_or_else(|| WalletError::NoSigningKey(from.to_string()))?;

        let mut selected = Vec::new();
        let mut total = 0i64;
        for (outpoint, value) in &from_book.utxos {
            selected.push(outpoint.clone());
            total += value;
            if total >= amount {
                break;
            }
        }
        if total < amount {
            return Err(WalletError::InsufficientFunds {
                available: total,
                requested: amount,
            });
        }

        let tx_in: Vec<TxIn> = selected
            .into_iter()
            .map(|prev| TxIn {
                prev,
                signature_script: Vec::new(),
                sequence: 0xFFFF_FFFF,
            })
            .collect();
        let mut tx_out = vec![TxOut {
            value: amount,
            pk_script: to_book.identity.pk_script.clone(),
        }];
        let change = total - amount;
        if change > 0 {
            tx_out.push(TxOut {
                value: change,
                pk_script: from_book.identity.pk_script.clone(),
            });
        }

        let mut tx = Transaction {
            version: 1,
            tx_in,
            tx_out,
            lock_time: 0,
        };
        let sighash = tx.signature_digest();
        let sig_script = p2pkh_sig_script(signing_key, &sighash);
        for input in &mut tx.tx_in {
            input.signature_script = sig_script.clone();
        }
        Ok(tx)
    }
}

impl TransactionObserver for Wallet {
    /// Indexes newly-created outputs owned by a registered identity, and
    /// drops outputs spent by this transaction's inputs. Called while the
    /// chain mutex is held, for both mempool admission and confirmed
    /// blocks — a transaction that was already admitted to the mempool is
    /// observed again once its block commits (§4.5), so this is keyed by
    /// outpoint and idempotent: a reorg that resurrects a transaction
    /// re-observes it without double-booking, and a rolled-back one leaves
    /// already-spent entries removed, matching the chain's own
    /// forward-only replay of accepted transactions.
    fn observe(&self, tx: &Transaction) {
        let txid = tx.txid();
        let index = self.pk_script_index.lock();
        let mut identities = self.identities.lock();
        let mut owners = self.utxo_owner.lock();

        for (i, output) in tx.tx_out.iter().enumerate() {
            let script_hash = hash256(&output.pk_script);
            if let Some(name) = index.get(&script_hash) {
                let outpoint = OutPoint {
                    hash: txid,
                    index: i as u32,
                };
                if owners.contains_key(&outpoint) {
                    continue; // already indexed (e.g. mempool admission, then block commit)
                }
                if let Some(book) = identities.get_mut(name) {
                    book.utxos.push((outpoint.clone(), output.value));
                    debug!(identity = %name, %outpoint, value = output.value, "indexed a new owned output");
                }
                owners.insert(outpoint, name.clone());
            }
        }

        for input in &tx.tx_in {
            if let Some(name) = owners.remove(&input.prev) {
                if let Some(book) = identities.get_mut(&name) {
                    book.utxos.retain(|(outpoint, _)| *outpoint != input.prev);
                }
            }
        }
    }
}
