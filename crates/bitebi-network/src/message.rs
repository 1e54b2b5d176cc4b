//! Message payload encoding for each dispatchable command (§6).
//!
//! Every payload is built on [`bitebi_core::codec`]'s `Reader`/`Writer`,
//! the same primitives `bitebi-core::types` uses for blocks and
//! transactions, so the whole wire format shares one encoding discipline.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitebi_core::codec::{Reader, Writer};
use bitebi_core::constants::{MAX_GETBLOCKS_HASHES, MAX_INV_ENTRIES};
use bitebi_core::{Block, CodecError, Hash256, Transaction};

/// Inventory item type (§6: "Types: `MSG_TX=1`, `MSG_BLOCK=2` (others
/// defined but unused)").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvType {
    Tx,
    Block,
    Unknown(u32),
}

impl InvType {
    fn to_u32(self) -> u32 {
        match self {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Unknown(n) => n,
        }
    }

    fn from_u32(n: u32) -> Self {
        match n {
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Unknown(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvItem {
    pub ty: InvType,
    pub hash: Hash256,
}

impl InvItem {
    pub fn block(hash: Hash256) -> Self {
        Self {
            ty: InvType::Block,
            hash,
        }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self {
            ty: InvType::Tx,
            hash,
        }
    }

    fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let ty = InvType::from_u32(r.read_u32()?);
        let hash = Hash256::read(r)?;
        Ok(Self { ty, hash })
    }

    fn write(&self, w: &mut Writer) {
        w.write_u32(self.ty.to_u32());
        self.hash.write(w);
    }
}

/// One advertised peer endpoint (§6 `addr` payload entry).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddrEntry {
    pub time: u32,
    pub services: u64,
    pub addr: SocketAddr,
}

impl AddrEntry {
    fn read(r: &mut Reader) -> Result<Self, CodecError> {
        let time = r.read_u32()?;
        let services = r.read_u64()?;
        let raw = r.read_array16()?;
        let port = r.read_u16()?;
        let addr = socket_addr_from_ipv6_mapped(Ipv6Addr::from(raw), port);
        Ok(Self {
            time,
            services,
            addr,
        })
    }

    fn write(&self, w: &mut Writer) {
        w.write_u32(self.time);
        w.write_u64(self.services);
        w.write_bytes(&ipv6_mapped_bytes(self.addr.ip()).octets());
        w.write_u16(self.addr.port());
    }
}

fn ipv6_mapped_bytes(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn socket_addr_from_ipv6_mapped(v6: Ipv6Addr, port: u16) -> SocketAddr {
    match v6.to_ipv4_mapped() {
        Some(v4) => SocketAddr::new(IpAddr::V4(v4), port),
        None => SocketAddr::new(IpAddr::V6(v6), port),
    }
}

/// A dispatchable protocol message (§4.8 dispatch table, §6 wire payloads).
/// Control messages (`version`/`verack`/`ping`/`pong`/...) are not modeled
/// here at all — their frames are read and discarded by the dispatcher
/// without ever reaching this type (§4.8: "their frames are consumed and
/// discarded").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    GetAddr,
    Addr(Vec<AddrEntry>),
    Mempool,
    GetBlocks {
        version: u32,
        locator: Vec<Hash256>,
        stop_hash: Hash256,
    },
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    Tx(Transaction),
    Block(Block),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::GetAddr => "getaddr",
            Message::Addr(_) => "addr",
            Message::Mempool => "mempool",
            Message::GetBlocks { .. } => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Message::GetAddr | Message::Mempool => {}
            Message::Addr(entries) => write_addr_list(&mut w, entries),
            Message::GetBlocks {
                version,
                locator,
                stop_hash,
            } => {
                w.write_u32(*version);
                w.write_compact_uint(locator.len() as u64);
                for hash in locator {
                    hash.write(&mut w);
                }
                stop_hash.write(&mut w);
            }
            Message::Inv(items) => write_inv_list(&mut w, items),
            Message::GetData(items) => write_inv_list(&mut w, items),
            Message::Tx(tx) => tx.write(&mut w),
            Message::Block(block) => w.write_bytes(&block.serialize()),
        }
        w.into_bytes()
    }

    /// Decode a payload given the command string that named it (the
    /// dispatcher already knows the command from the frame header).
    pub fn decode(command: &str, payload: &[u8]) -> Result<Option<Self>, CodecError> {
        let mut r = Reader::new(payload);
        let msg = match command {
            "getaddr" => Some(Message::GetAddr),
            "mempool" => Some(Message::Mempool),
            "addr" => Some(Message::Addr(read_addr_list(&mut r)?)),
            "getblocks" => {
                let version = r.read_u32()?;
                let n = r.read_compact_uint()?;
                if n > MAX_GETBLOCKS_HASHES {
                    return Err(CodecError::SequenceTooLarge(n));
                }
                let mut locator = Vec::with_capacity(n.min(4096) as usize);
                for _ in 0..n {
                    locator.push(Hash256::read(&mut r)?);
                }
                let stop_hash = Hash256::read(&mut r)?;
                Some(Message::GetBlocks {
                    version,
                    locator,
                    stop_hash,
                })
            }
            "inv" => Some(Message::Inv(read_inv_list(&mut r)?)),
            "getdata" => Some(Message::GetData(read_inv_list(&mut r)?)),
            "tx" => Some(Message::Tx(Transaction::read(&mut r)?)),
            "block" => Some(Message::Block(Block::read(&mut r)?)),
            _ => None, // §4.8: unknown commands are ignored
        };
        if msg.is_some() {
            r.finish()?;
        }
        Ok(msg)
    }
}

fn write_inv_list(w: &mut Writer, items: &[InvItem]) {
    w.write_compact_uint(items.len() as u64);
    for item in items {
        item.write(w);
    }
}

fn read_inv_list(r: &mut Reader) -> Result<Vec<InvItem>, CodecError> {
    let n = r.read_compact_uint()?;
    if n as usize > MAX_INV_ENTRIES {
        return Err(CodecError::SequenceTooLarge(n));
    }
    let mut items = Vec::with_capacity(n.min(4096) as usize);
    for _ in 0..n {
        items.push(InvItem::read(r)?);
    }
    Ok(items)
}

fn write_addr_list(w: &mut Writer, entries: &[AddrEntry]) {
    w.write_compact_uint(entries.len() as u64);
    for entry in entries {
        entry.write(w);
    }
}

fn read_addr_list(r: &mut Reader) -> Result<Vec<AddrEntry>, CodecError> {
    let n = r.read_compact_uint()?;
    let mut entries = Vec::with_capacity(n.min(4096) as usize);
    for _ in 0..n {
        entries.push(AddrEntry::read(r)?);
    }
    Ok(entries)
}
