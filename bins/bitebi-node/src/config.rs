//! Command-line configuration for the node binary.
//!
//! Grounded on the teacher's `rill-node` argument layout (flat
//! `#[derive(Parser)]` struct, network preset picked by a handful of
//! boolean flags, a `log_level` string fed straight to `EnvFilter`).

use bitebi_core::constants::NetworkParams;
use clap::Parser;

/// bitebi full node — chain engine, miner, and peer gossip behind an
/// interactive command shell.
#[derive(Parser, Debug)]
#[command(name = "bitebi-node", version, about = "bitebi node shell")]
pub struct Args {
    /// Network preset to speak: `mainnet`, `testnet`, `regtest`, or `bitebi`.
    #[arg(long, default_value = "bitebi")]
    pub network: String,

    /// Initial listening/dialing port. Defaults to the preset's port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Read shell commands from this file before falling back to stdin.
    #[arg(long = "input", value_name = "FILE")]
    pub input: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Resolve the chosen network preset, falling back to `bitebi` on an
    /// unrecognized name (a configuration error, not a fatal one — §7).
    pub fn network_params(&self) -> NetworkParams {
        NetworkParams::by_name(&self.network).unwrap_or_else(|| {
            tracing::warn!(requested = %self.network, "unknown network preset, defaulting to bitebi");
            bitebi_core::constants::BITEBI
        })
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.network_params().default_port)
    }
}

/// Install a `tracing-subscriber` formatter driven by `RUST_LOG`, falling
/// back to `level` (§7: log stream is the only user-facing error channel).
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
