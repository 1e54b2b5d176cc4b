//! Core wire types: outpoints, transactions, block headers, blocks (§3, §6).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{Reader, Writer};
use crate::error::CodecError;
use crate::hash::hash256;
use crate::merkle::merkle_root;

/// Maximum accepted size of a single script (`signature_script` or
/// `pk_script`), to bound frame sizes. Generous relative to the tiny
/// scripts §4.4 actually needs, but prevents unbounded allocation from a
/// malformed peer.
const MAX_SCRIPT_LEN: u64 = 1_000_000;

/// A 32-byte hash value (block header hash, txid, or merkle root).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self(r.read_array32()?))
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_bytes(&self.0);
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Displayed reversed, matching the convention of the block
        // explorer / block-hash-as-hex-string idiom (§6: "hashes
        // transmitted as 32 bytes internal (display-reversed)").
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

/// Reference to a specific output of a previous transaction (§3).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    /// Marker index used by the coinbase's lone input (§3).
    pub const COINBASE_INDEX: u32 = 0xFFFF;

    pub fn is_coinbase_marker(&self) -> bool {
        self.index == Self::COINBASE_INDEX
    }

    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let hash = Hash256::read(r)?;
        let index = r.read_u32()?;
        Ok(Self { hash, index })
    }

    pub fn write(&self, w: &mut Writer) {
        self.hash.write(w);
        w.write_u32(self.index);
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

/// A transaction input, spending a previous output (§3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prev: OutPoint,
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let prev = OutPoint::read(r)?;
        let signature_script = r.read_var_bytes(MAX_SCRIPT_LEN)?;
        let sequence = r.read_u32()?;
        Ok(Self {
            prev,
            signature_script,
            sequence,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        self.prev.write(w);
        w.write_var_bytes(&self.signature_script);
        w.write_u32(self.sequence);
    }
}

/// A transaction output, creating a new spendable outpoint (§3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: i64,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let value = r.read_i64()?;
        let pk_script = r.read_var_bytes(MAX_SCRIPT_LEN)?;
        Ok(Self { value, pk_script })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i64(self.value);
        w.write_var_bytes(&self.pk_script);
    }
}

/// A transaction: ordered inputs, ordered outputs, a lock time (§3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Serialize per §6: `version` ‖ `compact_uint(n_in)` ‖ n_in × TxIn ‖
    /// `compact_uint(n_out)` ‖ n_out × TxOut ‖ `lock_time`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i32(self.version);
        w.write_compact_uint(self.tx_in.len() as u64);
        for input in &self.tx_in {
            input.write(&mut w);
        }
        w.write_compact_uint(self.tx_out.len() as u64);
        for output in &self.tx_out {
            output.write(&mut w);
        }
        w.write_u32(self.lock_time);
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let tx = Self::read(&mut r)?;
        r.finish()?;
        Ok(tx)
    }

    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let version = r.read_i32()?;
        let n_in = r.read_compact_uint()?;
        let mut tx_in = Vec::with_capacity(n_in.min(4096) as usize);
        for _ in 0..n_in {
            tx_in.push(TxIn::read(r)?);
        }
        let n_out = r.read_compact_uint()?;
        let mut tx_out = Vec::with_capacity(n_out.min(4096) as usize);
        for _ in 0..n_out {
            tx_out.push(TxOut::read(r)?);
        }
        let lock_time = r.read_u32()?;
        Ok(Self {
            version,
            tx_in,
            tx_out,
            lock_time,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.version);
        w.write_compact_uint(self.tx_in.len() as u64);
        for input in &self.tx_in {
            input.write(w);
        }
        w.write_compact_uint(self.tx_out.len() as u64);
        for output in &self.tx_out {
            output.write(w);
        }
        w.write_u32(self.lock_time);
    }

    /// Transaction identity = `Hash(serialization)` (§3).
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// A coinbase has exactly one input whose `prev.index` is the
    /// coinbase marker (§3).
    pub fn is_coinbase(&self) -> bool {
        self.tx_in.len() == 1 && self.tx_in[0].prev.is_coinbase_marker()
    }

    /// Sum of output values. Does not check for overflow beyond `i64`
    /// wraparound; callers validate against UTXO sums separately (§4.5).
    pub fn total_output_value(&self) -> i64 {
        self.tx_out.iter().map(|o| o.value).sum()
    }

    /// The transaction with every input's `signature_script` cleared, used
    /// to compute the signature digest (§4.4).
    pub fn with_cleared_signature_scripts(&self) -> Self {
        let mut clone = self.clone();
        for input in &mut clone.tx_in {
            input.signature_script.clear();
        }
        clone
    }

    /// Digest signed by `CHECKSIG`/`CHECKMULTISIG`: `Hash` of this
    /// transaction with every input's `signature_script` field cleared
    /// (§4.4).
    pub fn signature_digest(&self) -> Hash256 {
        hash256(&self.with_cleared_signature_scripts().serialize())
    }
}

/// An 80-byte fixed-form block header (§3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub n_bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut w = Writer::new();
        w.write_i32(self.version);
        self.prev_hash.write(&mut w);
        self.merkle_root.write(&mut w);
        w.write_u32(self.time);
        w.write_u32(self.n_bits);
        w.write_u32(self.nonce);
        let bytes = w.into_bytes();
        bytes.try_into().expect("fixed-size header")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let header = Self::read(&mut r)?;
        r.finish()?;
        Ok(header)
    }

    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let version = r.read_i32()?;
        let prev_hash = Hash256::read(r)?;
        let merkle_root = Hash256::read(r)?;
        let time = r.read_u32()?;
        let n_bits = r.read_u32()?;
        let nonce = r.read_u32()?;
        Ok(Self {
            version,
            prev_hash,
            merkle_root,
            time,
            n_bits,
            nonce,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.version);
        self.prev_hash.write(w);
        self.merkle_root.write(w);
        w.write_u32(self.time);
        w.write_u32(self.n_bits);
        w.write_u32(self.nonce);
    }

    /// Block identity = `Hash` of the serialized header (§3).
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }
}

/// A serialized block: header plus its transactions, first of which is
/// the coinbase (§3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&self.header.serialize());
        w.write_compact_uint(self.txs.len() as u64);
        for tx in &self.txs {
            tx.write(&mut w);
        }
        w.into_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let block = Self::read(&mut r)?;
        r.finish()?;
        Ok(block)
    }

    pub fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let header_bytes = r.read_bytes(BlockHeader::SIZE)?;
        let header = BlockHeader::deserialize(&header_bytes)?;
        let n_tx = r.read_compact_uint()?;
        let mut txs = Vec::with_capacity(n_tx.min(65536) as usize);
        for _ in 0..n_tx {
            txs.push(Transaction::read(r)?);
        }
        Ok(Self { header, txs })
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.txs.first()
    }

    /// Computed Merkle root over this block's transactions, for comparison
    /// against `header.merkle_root` (I4).
    pub fn computed_merkle_root(&self) -> Hash256 {
        let leaves: Vec<Hash256> = self.txs.iter().map(Transaction::txid).collect();
        merkle_root(&leaves)
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            tx_in: vec![TxIn {
                prev: OutPoint {
                    hash: Hash256([9u8; 32]),
                    index: 0,
                },
                signature_script: vec![1, 2, 3],
                sequence: 0xFFFF_FFFF,
            }],
            tx_out: vec![TxOut {
                value: 50,
                pk_script: vec![0xAA; 20],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn transaction_round_trips() {
        let tx = sample_tx();
        let bytes = tx.serialize();
        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn header_round_trips_and_is_80_bytes() {
        let header = BlockHeader {
            version: 1,
            prev_hash: Hash256([1u8; 32]),
            merkle_root: Hash256([2u8; 32]),
            time: 1234,
            n_bits: 0x1D00_FFFF,
            nonce: 99,
        };
        let bytes = header.serialize();
        assert_eq!(bytes.len(), 80);
        assert_eq!(BlockHeader::deserialize(&bytes).unwrap(), header);
    }

    #[test]
    fn block_round_trips() {
        let header = BlockHeader {
            version: 0,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: 0,
            n_bits: 0x1D00_FFFF,
            nonce: 0,
        };
        let block = Block {
            header,
            txs: vec![sample_tx(), sample_tx()],
        };
        let bytes = block.serialize();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn coinbase_marker_detection() {
        let mut tx = sample_tx();
        assert!(!tx.is_coinbase());
        tx.tx_in[0].prev = OutPoint {
            hash: Hash256::ZERO,
            index: OutPoint::COINBASE_INDEX,
        };
        assert!(tx.is_coinbase());
    }

    #[test]
    fn signature_digest_ignores_signature_scripts() {
        let mut tx = sample_tx();
        let digest_before = tx.signature_digest();
        tx.tx_in[0].signature_script = vec![9, 9, 9, 9];
        let digest_after = tx.signature_digest();
        assert_eq!(digest_before, digest_after);
    }
}
