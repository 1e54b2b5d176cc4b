//! The interactive command shell (§6 "CLI surface"): a line-oriented REPL
//! wiring the chain engine, miner, peer layer, and wallet together. Kept
//! as a hand-rolled dispatcher over whitespace-split tokens, matching the
//! CLI surface's fixed, positional-argument command set rather than
//! `clap`'s subcommand machinery (which is reserved for process startup
//! flags in `config.rs`).

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitebi_chain::{BlockBroadcaster, Chain};
use bitebi_core::constants::NetworkParams;
use bitebi_core::Block;
use bitebi_miner::{MinerConfig, MinerControl};
use bitebi_network::{NetworkConfig, Peer};
use bitebi_wallet::Wallet;
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use tracing::{error, info, warn};

/// A `BlockBroadcaster` that goes nowhere, used when `mine` runs before
/// any `serve`/`peer` call has constructed a `Peer` — single-node mining
/// (§8 S1) doesn't require a network.
struct NullBroadcaster;

impl BlockBroadcaster for NullBroadcaster {
    fn broadcast_block(&self, _block: &Block) {}
}

struct RunningMiner {
    stop: Arc<AtomicBool>,
}

/// Everything the shell commands act on. Owns the chain, the wallet, the
/// miner's pause controller, and lazily-constructed peer/miner-thread
/// handles.
pub struct Node {
    chain: Arc<Chain>,
    wallet: Arc<Wallet>,
    network_params: NetworkParams,
    default_port: u16,
    peer: Mutex<Option<Arc<Peer>>>,
    bound_port: Mutex<Option<u16>>,
    miner_control: Arc<MinerControl>,
    miner: Mutex<Option<RunningMiner>>,
    self_name: Mutex<String>,
}

impl Node {
    pub fn new(chain: Arc<Chain>, wallet: Arc<Wallet>, network_params: NetworkParams, default_port: u16) -> Self {
        const DEFAULT_IDENTITY: &str = "self";
        wallet.add_secret_identity(DEFAULT_IDENTITY, SigningKey::generate(&mut OsRng));
        Self {
            chain,
            wallet,
            network_params,
            default_port,
            peer: Mutex::new(None),
            bound_port: Mutex::new(None),
            miner_control: Arc::new(MinerControl::new()),
            miner: Mutex::new(None),
            self_name: Mutex::new(DEFAULT_IDENTITY.to_string()),
        }
    }

    /// Run a single already-tokenized command line. Unrecognized commands
    /// and malformed arguments are configuration errors (§7): report and
    /// keep the shell running.
    pub fn execute(&self, line: &str) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return;
        };
        let args = &tokens[1..];
        let result = match command {
            "serve" => self.cmd_serve(args),
            "peer" => self.cmd_peer(args),
            "mine" => self.cmd_mine(args),
            "stopmining" => self.cmd_stopmining(args),
            "resumemining" => self.cmd_resumemining(args),
            "transfer" => self.cmd_transfer(args),
            "showbalance" => self.cmd_showbalance(args),
            "addpk" => self.cmd_addpk(args),
            "addsk" => self.cmd_addsk(args),
            "showpeer" => self.cmd_showpeer(args),
            "stat" => self.cmd_stat(args),
            "sleep" => self.cmd_sleep(args),
            "name" => self.cmd_name(args),
            other => Err(format!("unknown command {other:?}")),
        };
        if let Err(e) = result {
            error!("{e}");
        }
    }

    /// Returns (constructing on first use) the peer bound to `port`.
    /// Once constructed the listening/dialing port is fixed for the rest
    /// of the process — a real node binds one listener — so a later
    /// `serve`/`peer` call with a different port just reuses the existing
    /// one and logs the mismatch.
    fn ensure_peer(&self, port: u16) -> Arc<Peer> {
        let mut guard = self.peer.lock();
        if let Some(peer) = guard.as_ref() {
            let bound = *self.bound_port.lock();
            if Some(port) != bound {
                warn!(requested = port, ?bound, "peer already bound to a different port; ignoring");
            }
            return Arc::clone(peer);
        }
        let config = NetworkConfig::new(self.network_params).with_port(port);
        let peer = Peer::new(config, Arc::clone(&self.chain));
        *guard = Some(Arc::clone(&peer));
        *self.bound_port.lock() = Some(port);
        peer
    }

    fn broadcaster(&self) -> Arc<dyn BlockBroadcaster> {
        match self.peer.lock().as_ref() {
            Some(peer) => Arc::clone(peer) as Arc<dyn BlockBroadcaster>,
            None => Arc::new(NullBroadcaster),
        }
    }

    fn cmd_serve(&self, args: &[&str]) -> Result<(), String> {
        let port = parse_port(args, self.default_port)?;
        let peer = self.ensure_peer(port);
        peer.start_listening().map_err(|e| format!("failed to bind listener: {e}"))?;
        Ok(())
    }

    fn cmd_peer(&self, args: &[&str]) -> Result<(), String> {
        let addr_str = args.first().ok_or("usage: peer <addr>")?;
        let addr: SocketAddr = addr_str.parse().map_err(|e| format!("invalid address {addr_str:?}: {e}"))?;
        let peer = self.ensure_peer(self.default_port);
        peer.dial(addr);
        Ok(())
    }

    fn cmd_mine(&self, _args: &[&str]) -> Result<(), String> {
        let mut guard = self.miner.lock();
        if guard.is_some() {
            return Err("already mining".to_string());
        }
        self.spawn_miner(&mut guard)
    }

    fn spawn_miner(&self, guard: &mut Option<RunningMiner>) -> Result<(), String> {
        let name = self.self_name.lock().clone();
        let pk_script = self
            .wallet
            .pk_script(&name)
            .ok_or_else(|| format!("no identity named {name:?} to mine to"))?;

        let stop = Arc::new(AtomicBool::new(false));
        let cfg = MinerConfig {
            version: 1,
            n_bits: self.network_params.max_n_bits,
            pk_script,
        };
        let chain = Arc::clone(&self.chain);
        let broadcaster = self.broadcaster();
        let control = Arc::clone(&self.miner_control);
        let thread_stop = Arc::clone(&stop);
        std::thread::spawn(move || bitebi_miner::run(chain, broadcaster, control, cfg, thread_stop));

        *guard = Some(RunningMiner { stop });
        info!("mining started");
        Ok(())
    }

    fn cmd_stopmining(&self, _args: &[&str]) -> Result<(), String> {
        let mut guard = self.miner.lock();
        match guard.take() {
            Some(running) => {
                running.stop.store(true, Ordering::Relaxed);
                self.miner_control.resume(); // unstick if paused, so it observes the stop flag
                info!("mining stopped");
                Ok(())
            }
            None => Err("not currently mining".to_string()),
        }
    }

    fn cmd_resumemining(&self, _args: &[&str]) -> Result<(), String> {
        let mut guard = self.miner.lock();
        if guard.is_some() {
            return Err("already mining".to_string());
        }
        self.spawn_miner(&mut guard)
    }

    fn cmd_transfer(&self, args: &[&str]) -> Result<(), String> {
        let (Some(&from), Some(&to), Some(&amount)) = (args.first(), args.get(1), args.get(2)) else {
            return Err("usage: transfer <from> <to> <amount>".to_string());
        };
        let amount: i64 = amount.parse().map_err(|e| format!("invalid amount {amount:?}: {e}"))?;
        let tx = self
            .wallet
            .build_transfer(from, to, amount)
            .map_err(|e| e.to_string())?;
        let txid = tx.txid();
        self.chain.add_transaction(tx.clone());
        if let Some(peer) = self.peer.lock().as_ref() {
            peer.broadcast_tx(&tx);
        }
        info!(%txid, "transfer submitted");
        Ok(())
    }

    fn cmd_showbalance(&self, args: &[&str]) -> Result<(), String> {
        if let Some(&name) = args.first() {
            let balance = self.wallet.balance(name).ok_or_else(|| format!("unknown identity {name:?}"))?;
            println!("{name}: {balance}");
        } else {
            for name in self.wallet.identity_names() {
                let balance = self.wallet.balance(&name).unwrap_or_default();
                println!("{name}: {balance}");
            }
        }
        Ok(())
    }

    fn cmd_addpk(&self, args: &[&str]) -> Result<(), String> {
        let (Some(&name), Some(&key)) = (args.first(), args.get(1)) else {
            return Err("usage: addpk <name> <key>".to_string());
        };
        let vk = parse_verifying_key(key)?;
        self.wallet.add_pubkey_identity(name, vk);
        Ok(())
    }

    fn cmd_addsk(&self, args: &[&str]) -> Result<(), String> {
        let (Some(&name), Some(&key)) = (args.first(), args.get(1)) else {
            return Err("usage: addsk <name> <key>".to_string());
        };
        let sk = parse_signing_key(key)?;
        self.wallet.add_secret_identity(name, sk);
        Ok(())
    }

    fn cmd_showpeer(&self, _args: &[&str]) -> Result<(), String> {
        match self.peer.lock().as_ref() {
            Some(peer) => {
                for addr in peer.peer_addrs() {
                    println!("{addr}");
                }
            }
            None => println!("not connected to the network yet"),
        }
        Ok(())
    }

    fn cmd_stat(&self, _args: &[&str]) -> Result<(), String> {
        let height = self.chain.len();
        let tip = self.chain.tip_hash();
        let mempool = self.chain.mempool_txids().len();
        let peers = self.peer.lock().as_ref().map(|p| p.peer_count()).unwrap_or(0);
        let mining = self.miner.lock().is_some();
        println!("height={height} tip={tip} mempool={mempool} peers={peers} mining={mining}");
        Ok(())
    }

    fn cmd_sleep(&self, args: &[&str]) -> Result<(), String> {
        let seconds: u64 = args
            .first()
            .ok_or("usage: sleep <seconds>")?
            .parse()
            .map_err(|e| format!("invalid seconds: {e}"))?;
        std::thread::sleep(Duration::from_secs(seconds));
        Ok(())
    }

    fn cmd_name(&self, args: &[&str]) -> Result<(), String> {
        let name = args.first().ok_or("usage: name <s>")?;
        if !self.wallet.has_identity(name) {
            self.wallet.add_secret_identity(*name, SigningKey::generate(&mut OsRng));
        }
        *self.self_name.lock() = name.to_string();
        Ok(())
    }
}

fn parse_port(args: &[&str], default: u16) -> Result<u16, String> {
    match args.first() {
        Some(s) => s.parse().map_err(|e| format!("invalid port {s:?}: {e}")),
        None => Ok(default),
    }
}

fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey, String> {
    let bytes = hex::decode(hex_key).map_err(|e| format!("invalid hex key: {e}"))?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| "public key must be 32 bytes".to_string())?;
    VerifyingKey::from_bytes(&array).map_err(|e| format!("invalid public key: {e}"))
}

fn parse_signing_key(hex_key: &str) -> Result<SigningKey, String> {
    let bytes = hex::decode(hex_key).map_err(|e| format!("invalid hex key: {e}"))?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| "secret key must be 32 bytes".to_string())?;
    Ok(SigningKey::from_bytes(&array))
}

/// Feed every line of `path` to the shell, then fall back to stdin — the
/// `-input <file>` flag's "script the shell" behavior (§6).
pub fn run(node: &Node, input: Option<&Path>) {
    if let Some(path) = input {
        match std::fs::File::open(path) {
            Ok(file) => {
                for line in io::BufReader::new(file).lines().map_while(Result::ok) {
                    println!("> {line}");
                    node.execute(&line);
                }
            }
            Err(e) => error!(?path, error = %e, "failed to open input file"),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        let _ = stdout.flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => node.execute(line.trim_end()),
            Err(e) => {
                error!(error = %e, "failed to read from stdin");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitebi_core::genesis::genesis_block;

    fn test_node() -> Node {
        let chain = Arc::new(Chain::new(genesis_block()));
        let wallet = Arc::new(Wallet::new());
        chain.register_observer(wallet.clone());
        Node::new(chain, wallet, bitebi_core::constants::REGTEST, 0)
    }

    #[test]
    fn name_registers_a_fresh_identity() {
        let node = test_node();
        assert!(!node.wallet.has_identity("alice"));
        node.execute("name alice");
        assert!(node.wallet.has_identity("alice"));
        assert_eq!(*node.self_name.lock(), "alice");
    }

    #[test]
    fn showbalance_of_unknown_identity_reports_an_error_not_a_panic() {
        let node = test_node();
        node.cmd_showbalance(&["nobody"]).unwrap_err();
    }

    #[test]
    fn mine_then_stopmining_toggles_the_running_flag() {
        let node = test_node();
        node.execute("mine");
        assert!(node.miner.lock().is_some());
        node.execute("stopmining");
        assert!(node.miner.lock().is_none());
    }

    #[test]
    fn stat_reports_genesis_height_on_a_fresh_chain() {
        let node = test_node();
        node.cmd_stat(&[]).unwrap();
        assert_eq!(node.chain.len(), 1);
    }
}
