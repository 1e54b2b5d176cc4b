//! A wallet identity: an ed25519 key pair (or, for watch-only identities,
//! just a public key) plus the P2PKH-style `pk_script` it owns (§4.4, §4.9).
//! Script construction mirrors `bitebi-core`'s own script-building test
//! helper byte-for-byte: `Push` tagged `0x00` ‖ `compact_uint` length ‖
//! bytes, opcodes `DUP`=`0x01`, `HASH160`=`0x02`, `EQUALVERIFY`=`0x04`,
//! `CHECKSIG`=`0x06`.

use bitebi_core::codec::Writer;
use bitebi_core::hash::hash256;
use bitebi_core::Hash256;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

/// Key material backing an identity, distinguishing spend-capable
/// identities (`addsk`) from watch-only ones (`addpk`).
pub enum KeyMaterial {
    Public(VerifyingKey),
    Secret(SigningKey),
}

pub(crate) struct Identity {
    pub(crate) signing_key: Option<SigningKey>,
    pub(crate) pk_script: Vec<u8>,
}

impl Identity {
    pub(crate) fn new(material: KeyMaterial) -> Self {
        let (verifying_key, signing_key) = match material {
            KeyMaterial::Public(vk) => (vk, None),
            KeyMaterial::Secret(sk) => (sk.verifying_key(), Some(sk)),
        };
        Self {
            signing_key,
            pk_script: p2pkh_pk_script(&verifying_key),
        }
    }
}

fn push_op(w: &mut Writer, data: &[u8]) {
    w.write_u8(0x00);
    w.write_compact_uint(data.len() as u64);
    w.write_bytes(data);
}

/// `DUP HASH160 <pubkey_hash> EQUALVERIFY CHECKSIG`.
pub(crate) fn p2pkh_pk_script(verifying_key: &VerifyingKey) -> Vec<u8> {
    let pk_hash = hash256(&verifying_key.to_bytes());
    let mut w = Writer::new();
    w.write_u8(0x01); // DUP
    w.write_u8(0x02); // HASH160
    push_op(&mut w, pk_hash.as_bytes());
    w.write_u8(0x04); // EQUALVERIFY
    w.write_u8(0x06); // CHECKSIG
    w.into_bytes()
}

/// `<signature> <pubkey>`, spending a `p2pkh_pk_script` output.
pub(crate) fn p2pkh_sig_script(signing_key: &SigningKey, sighash: &Hash256) -> Vec<u8> {
    let signature = signing_key.sign(sighash.as_bytes()).to_bytes();
    let pubkey = signing_key.verifying_key().to_bytes();
    let mut w = Writer::new();
    push_op(&mut w, &signature);
    push_op(&mut w, &pubkey);
    w.into_bytes()
}
