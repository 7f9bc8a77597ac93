//! Ledger node
//!
//! Command-line front end: wallets, chain creation, transfers, chain dump,
//! UTXO reindexing and the JSON-RPC node.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use pow_ledger::config::{wallet_path, ChainConfig, DEFAULT_NODE_ID};
use pow_ledger::consensus::validate;
use pow_ledger::constants::DIFFICULTY;
use pow_ledger::rpc::{start_rpc_server, RpcState};
use pow_ledger::storage::{Chain, SledStore, UtxoIndex};
use pow_ledger::transaction::{build_transfer, Transaction};
use pow_ledger::wallet::{address_to_pubkey_hash, Wallets};

/// Proof-of-work ledger node.
#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Single-writer proof-of-work ledger")]
#[command(version)]
struct Cli {
    /// Node id; selects ./tmp/blocks_<id> and ./tmp/wallets_<id>.data
    #[arg(long, env = "NODE_ID", default_value = DEFAULT_NODE_ID)]
    node_id: String,

    /// Proof-of-work difficulty in leading zero bits.
    #[arg(long, default_value_t = DIFFICULTY)]
    difficulty: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new key pair and save it in the wallet file
    #[command(name = "createwallet")]
    CreateWallet,

    /// List the addresses in the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Create a blockchain and send the genesis reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get the balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT from FROM to TO
    #[command(name = "send")]
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transfer into a block on this node
        #[arg(long)]
        mine: bool,
    },

    /// Print every block from tip to genesis
    #[command(name = "printchain")]
    PrintChain,

    /// Rebuild the UTXO index from the chain
    #[command(name = "reindexutxo")]
    ReindexUtxo,

    /// Serve JSON-RPC for peers and tools
    #[command(name = "startnode")]
    StartNode {
        /// RPC listen address
        #[arg(long, default_value = "127.0.0.1:9334")]
        rpc_listen: SocketAddr,

        /// Address receiving rewards of blocks mined through `generate`
        #[arg(long)]
        miner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(cli.log_level.as_str()));

    let config = ChainConfig::for_node(&cli.node_id).with_difficulty(cli.difficulty);
    let wallet_file = wallet_path(&cli.node_id);

    match cli.command {
        Command::CreateWallet => {
            let mut wallets = Wallets::load(&wallet_file)?;
            let address = wallets.create_wallet();
            wallets.save()?;
            println!("New address: {}", address);
        }

        Command::ListAddresses => {
            let wallets = Wallets::load(&wallet_file)?;
            for address in wallets.addresses() {
                println!("{}", address);
            }
        }

        Command::CreateBlockchain { address } => {
            let reward_to = address_to_pubkey_hash(&address)?;
            let chain = Chain::open_new(config, reward_to)?;
            let entries = UtxoIndex::new(&chain).reindex()?;
            info!("UTXO index holds {} transactions", entries);
            println!("Done! Genesis block {}", chain.tip_hash());
        }

        Command::GetBalance { address } => {
            let pubkey_hash = address_to_pubkey_hash(&address)?;
            let chain = Chain::open_existing(config)?;
            let balance = UtxoIndex::new(&chain).balance(&pubkey_hash)?;
            println!("Balance of {}: {}", address, balance);
        }

        Command::Send {
            from,
            to,
            amount,
            mine,
        } => send(config, &wallet_file, &from, &to, amount, mine)?,

        Command::PrintChain => {
            let chain = Chain::open_existing(config)?;
            for block in chain.iter() {
                let block = block?;
                println!("============ Block {} ============", block.hash);
                println!("Height: {}", block.height);
                println!(
                    "Prev. block: {}",
                    block.prev_hash.map(|h| h.to_hex()).unwrap_or_default()
                );
                println!("Nonce: {}", block.nonce);
                println!("PoW: {}", validate(&block));
                for tx in &block.transactions {
                    println!("{}", tx);
                }
                println!();
            }
        }

        Command::ReindexUtxo => {
            let chain = Chain::open_existing(config)?;
            let count = UtxoIndex::new(&chain).reindex()?;
            println!("Done! There are {} transactions in the UTXO set.", count);
        }

        Command::StartNode { rpc_listen, miner } => {
            let miner = match miner {
                Some(address) => {
                    info!("Mining is on. Rewards go to {}", address);
                    Some(address_to_pubkey_hash(&address)?)
                }
                None => None,
            };

            let chain = Chain::open_existing(config)?;
            UtxoIndex::new(&chain).reindex()?;
            info!("Starting node {} at height {}", cli.node_id, chain.best_height()?);

            let state = Arc::new(RpcState::new(chain, miner));
            tokio::select! {
                result = start_rpc_server(state, rpc_listen) => result?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
            }
        }
    }

    Ok(())
}

fn send(
    config: ChainConfig,
    wallet_file: &std::path::Path,
    from: &str,
    to: &str,
    amount: u64,
    mine: bool,
) -> Result<(), Box<dyn Error>> {
    let recipient = address_to_pubkey_hash(to)?;
    let wallets = Wallets::load(wallet_file)?;
    let sender = wallets.get(from)?;

    let mut chain = Chain::<SledStore>::open_existing(config)?;
    let mut tx = build_transfer(sender.public_key(), recipient, amount, &UtxoIndex::new(&chain))?;
    chain.sign_transaction(&mut tx, sender.private_key())?;

    if !mine {
        println!("Signed transaction {} (not mined):", tx.id);
        println!("{}", hex::encode(tx.to_bytes()));
        return Ok(());
    }

    let reward = Transaction::coinbase(sender.pubkey_hash(), "", chain.config().block_reward);
    let block = chain.mine_block(vec![reward, tx])?;
    UtxoIndex::new(&chain).apply_block(&block)?;
    println!("Success! Mined block {} at height {}", block.hash, block.height);
    Ok(())
}
