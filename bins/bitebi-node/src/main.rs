//! bitebi node binary: wires the chain engine, wallet, and miner/peer
//! collaborators together behind the interactive command shell (§2
//! "Control flow").

mod config;
mod shell;

use std::sync::Arc;

use bitebi_chain::Chain;
use bitebi_core::genesis::genesis_block;
use bitebi_wallet::Wallet;
use clap::Parser;
use tracing::info;

fn main() {
    let args = config::Args::parse();
    config::init_logging(&args.log_level);

    let network_params = args.network_params();
    let port = args.port();
    info!(network = network_params.name, port, "starting bitebi node");

    let chain = Arc::new(Chain::new(genesis_block()));
    let wallet = Arc::new(Wallet::new());
    chain.register_observer(wallet.clone());

    let node = shell::Node::new(chain, wallet, network_params, port);
    shell::run(&node, args.input.as_deref());
}
