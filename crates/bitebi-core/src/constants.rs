//! Protocol constants and the fixed network presets (§6).

/// Block subsidy paid to the coinbase output. Fee-less per spec Non-goals,
/// so this is the entire coinbase budget — no difficulty retargeting either,
/// `nBits` is fixed per network preset and never recomputed.
pub const COINBASE_REWARD: i64 = 1;

/// Orphan pool entry time-to-live, in seconds (§3 "Ownership & lifecycle").
pub const BLOCK_TTL_SECS: u64 = 600;

/// Cap on `inv` entries per message (§6).
pub const MAX_INV_ENTRIES: usize = 50_000;

/// Cap on `getblocks` locator hashes (§6).
pub const MAX_GETBLOCKS_HASHES: u64 = 0x0200_0000;

/// 4-byte frame header used to delimit protocol messages (§6).
pub const FRAME_COMMAND_LEN: usize = 12;

/// A fixed bitebi network preset: magic bytes, default port, and the
/// maximum permitted `nBits` exponent/mantissa pair (which doubles as the
/// maximum permitted frame payload length, per §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub name: &'static str,
    pub magic: [u8; 4],
    pub default_port: u16,
    /// Maximum permitted `nBits` value for this network (also the max
    /// frame payload length, per §6).
    pub max_n_bits: u32,
}

pub const MAINNET: NetworkParams = NetworkParams {
    name: "mainnet",
    magic: [0xF9, 0xBE, 0xB4, 0xD9],
    default_port: 8333,
    max_n_bits: 0x1D00_FFFF,
};

pub const TESTNET: NetworkParams = NetworkParams {
    name: "testnet",
    magic: [0x0B, 0x11, 0x09, 0x07],
    default_port: 18333,
    max_n_bits: 0x1D00_FFFF,
};

pub const REGTEST: NetworkParams = NetworkParams {
    name: "regtest",
    magic: [0xFA, 0xBF, 0xB5, 0xDA],
    default_port: 18444,
    max_n_bits: 0x207F_FFFF,
};

/// The custom "bitebi" network: same magic/port as mainnet, wider
/// difficulty ceiling.
pub const BITEBI: NetworkParams = NetworkParams {
    name: "bitebi",
    magic: [0xF9, 0xBE, 0xB4, 0xD9],
    default_port: 8333,
    max_n_bits: 0x1E08_FFFF,
};

impl NetworkParams {
    /// Resolve a preset by name (`mainnet`, `testnet`, `regtest`, `bitebi`).
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "mainnet" => Some(MAINNET),
            "testnet" => Some(TESTNET),
            "regtest" => Some(REGTEST),
            "bitebi" => Some(BITEBI),
            _ => None,
        }
    }

    /// Maximum frame payload length for this network (§6: "`max_nBits`
    /// doubles as the maximum permitted payload length").
    pub fn max_payload_len(&self) -> u64 {
        self.max_n_bits as u64
    }
}
