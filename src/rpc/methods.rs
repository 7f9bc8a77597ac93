//! RPC method implementations
//!
//! Each method corresponds to a JSON-RPC call a peer or tool can make
//! against a running node.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::consensus::{validate, Block};
use crate::crypto::{Hash, PubKeyHash};
use crate::storage::{Chain, ChainError, SledStore, UtxoIndex};
use crate::transaction::Transaction;
use crate::wallet::address_to_pubkey_hash;

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC Error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL: i32 = -32603;
    pub const NOT_FOUND: i32 = -5;
    pub const DESERIALIZATION: i32 = -22;
    pub const REJECTED: i32 = -25;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }
}

impl From<ChainError> for JsonRpcError {
    fn from(e: ChainError) -> Self {
        let code = match e {
            ChainError::NotFound(_) => Self::NOT_FOUND,
            ChainError::InvalidBlock(_)
            | ChainError::InvalidTransaction(_)
            | ChainError::UnknownParent(_)
            | ChainError::UnknownPriorTransaction(_)
            | ChainError::EmptyBlock => Self::REJECTED,
            _ => Self::INTERNAL,
        };
        Self::new(code, e.to_string())
    }
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

type RpcResult = Result<Value, JsonRpcError>;

/// RPC handler state
pub struct RpcState {
    pub chain: Arc<Mutex<Chain<SledStore>>>,
    /// Reward identity for `generate`; mining is refused without one
    pub miner: Option<PubKeyHash>,
}

impl RpcState {
    pub fn new(chain: Chain<SledStore>, miner: Option<PubKeyHash>) -> Self {
        Self {
            chain: Arc::new(Mutex::new(chain)),
            miner,
        }
    }

    fn chain(&self) -> Result<MutexGuard<'_, Chain<SledStore>>, JsonRpcError> {
        self.chain
            .lock()
            .map_err(|_| JsonRpcError::new(JsonRpcError::INTERNAL, "chain lock poisoned"))
    }
}

/// Process a JSON-RPC request and return a response
pub async fn handle_request(state: Arc<RpcState>, request: JsonRpcRequest) -> JsonRpcResponse {
    let params = request.params;
    let result = match request.method.as_str() {
        "getblockcount" => get_block_count(&state),
        "getbestblockhash" => get_best_block_hash(&state),
        "getblockhashes" => get_block_hashes(&state),
        "getblock" => get_block(&state, params),
        "getbalance" => get_balance(&state, params),
        "getutxocount" => get_utxo_count(&state),
        "submitblock" => submit_block(&state, params),
        "generate" => generate(state.clone()).await,
        _ => Err(JsonRpcError::new(
            JsonRpcError::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        )),
    };

    match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(error) => JsonRpcResponse::error(request.id, error),
    }
}

/// First positional parameter as a string; a bare string is accepted too
fn string_param(params: Option<Value>, what: &str) -> Result<String, JsonRpcError> {
    match params {
        Some(Value::Array(arr)) => match arr.first() {
            Some(Value::String(s)) => Ok(s.clone()),
            _ => Err(JsonRpcError::invalid_params(format!("Invalid params: expected {}", what))),
        },
        Some(Value::String(s)) => Ok(s),
        _ => Err(JsonRpcError::invalid_params(format!("Invalid params: expected {}", what))),
    }
}

/// Returns the height of the best block
fn get_block_count(state: &RpcState) -> RpcResult {
    Ok(json!(state.chain()?.best_height()?))
}

fn get_best_block_hash(state: &RpcState) -> RpcResult {
    Ok(json!(state.chain()?.tip_hash().to_hex()))
}

/// Block hashes from tip to genesis
fn get_block_hashes(state: &RpcState) -> RpcResult {
    let hashes = state.chain()?.all_block_hashes()?;
    Ok(json!(hashes.iter().map(Hash::to_hex).collect::<Vec<_>>()))
}

/// Returns block data by hash
fn get_block(state: &RpcState, params: Option<Value>) -> RpcResult {
    let hash_str = string_param(params, "block hash")?;
    let hash = Hash::from_hex(&hash_str)
        .map_err(|_| JsonRpcError::invalid_params("Invalid block hash"))?;

    let block = state.chain()?.get_block(&hash)?;
    Ok(block_json(&block))
}

fn block_json(block: &Block) -> Value {
    json!({
        "hash": block.hash.to_hex(),
        "previousblockhash": block.prev_hash.map(|h| h.to_hex()),
        "height": block.height,
        "time": block.timestamp,
        "nonce": block.nonce,
        "difficulty": block.difficulty,
        "merkleroot": block.tx_digest().to_hex(),
        "pow_valid": validate(block),
        "tx": block.transactions.iter().map(|tx| tx.id.to_hex()).collect::<Vec<_>>(),
        "hex": hex::encode(block.to_bytes()),
    })
}

/// Returns the balance of an address
fn get_balance(state: &RpcState, params: Option<Value>) -> RpcResult {
    let address = string_param(params, "address")?;
    let pubkey_hash = address_to_pubkey_hash(&address)
        .map_err(|e| JsonRpcError::new(JsonRpcError::NOT_FOUND, e.to_string()))?;

    let chain = state.chain()?;
    let balance = UtxoIndex::new(&chain).balance(&pubkey_hash)?;
    Ok(json!(balance))
}

/// Number of transactions with unspent outputs
fn get_utxo_count(state: &RpcState) -> RpcResult {
    let chain = state.chain()?;
    Ok(json!(UtxoIndex::new(&chain).count_entries()?))
}

/// Accept a hex-encoded block mined elsewhere
fn submit_block(state: &RpcState, params: Option<Value>) -> RpcResult {
    let block_hex = string_param(params, "block hex")?;
    let bytes = hex::decode(&block_hex)
        .map_err(|_| JsonRpcError::new(JsonRpcError::DESERIALIZATION, "Invalid hex for block"))?;
    let block = Block::from_bytes(&bytes)
        .map_err(|e| JsonRpcError::new(JsonRpcError::DESERIALIZATION, e.to_string()))?;

    let mut chain = state.chain()?;
    let outcome = chain.add_block(block.clone()).map_err(|e| {
        warn!("Rejected submitted block {}: {}", block.hash, e);
        JsonRpcError::from(e)
    })?;
    UtxoIndex::new(&chain).sync(&block, outcome)?;

    Ok(json!({
        "hash": block.hash.to_hex(),
        "outcome": format!("{:?}", outcome),
    }))
}

/// Mine a coinbase-only block paying the node's miner identity.
///
/// Proof-of-work runs on a blocking worker without holding the chain lock,
/// then the block goes through `add_block` like any other.
async fn generate(state: Arc<RpcState>) -> RpcResult {
    let miner = state
        .miner
        .ok_or_else(|| JsonRpcError::new(JsonRpcError::INTERNAL, "No miner address configured"))?;

    let (template, difficulty, reward) = {
        let chain = state.chain()?;
        let coinbase = Transaction::coinbase(miner, "", chain.config().block_reward);
        (chain.prepare_block(vec![coinbase])?, chain.difficulty(), chain.config().block_reward)
    };

    let block = tokio::task::spawn_blocking(move || template.mine(difficulty))
        .await
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL, e.to_string()))??;

    let mut chain = state.chain()?;
    let outcome = chain.add_block(block.clone())?;
    UtxoIndex::new(&chain).sync(&block, outcome)?;
    info!("Generated block {} at height {} ({} to miner)", block.hash, block.height, reward);

    Ok(json!({
        "hash": block.hash.to_hex(),
        "height": block.height,
        "outcome": format!("{:?}", outcome),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::wallet::KeyPair;

    fn test_state(miner: &KeyPair) -> Arc<RpcState> {
        let config = ChainConfig::default().with_difficulty(4);
        let chain =
            Chain::init(SledStore::temporary().unwrap(), config, miner.pubkey_hash()).unwrap();
        UtxoIndex::new(&chain).reindex().unwrap();
        Arc::new(RpcState::new(chain, Some(miner.pubkey_hash())))
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: json!(1),
        }
    }

    async fn call(state: &Arc<RpcState>, method: &str, params: Option<Value>) -> JsonRpcResponse {
        handle_request(state.clone(), request(method, params)).await
    }

    #[tokio::test]
    async fn test_chain_queries() {
        let miner = KeyPair::generate();
        let state = test_state(&miner);

        let count = call(&state, "getblockcount", None).await;
        assert_eq!(count.result, Some(json!(0)));

        let best = call(&state, "getbestblockhash", None).await.result.unwrap();
        let hashes = call(&state, "getblockhashes", None).await.result.unwrap();
        assert_eq!(hashes, json!([best.clone()]));

        let block = call(&state, "getblock", Some(json!([best]))).await.result.unwrap();
        assert_eq!(block["height"], json!(0));
        assert_eq!(block["previousblockhash"], Value::Null);
        assert_eq!(block["pow_valid"], json!(true));

        let balance = call(&state, "getbalance", Some(json!([miner.address()]))).await;
        assert_eq!(balance.result, Some(json!(100)));

        let utxos = call(&state, "getutxocount", None).await;
        assert_eq!(utxos.result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_generate_extends_chain() {
        let miner = KeyPair::generate();
        let state = test_state(&miner);

        let generated = call(&state, "generate", None).await;
        assert!(generated.error.is_none());
        assert_eq!(generated.result.unwrap()["outcome"], json!("Extended"));

        let count = call(&state, "getblockcount", None).await;
        assert_eq!(count.result, Some(json!(1)));
        let balance = call(&state, "getbalance", Some(json!(miner.address()))).await;
        assert_eq!(balance.result, Some(json!(200)));
    }

    #[tokio::test]
    async fn test_submit_block() {
        let miner = KeyPair::generate();
        let state = test_state(&miner);
        let tip = state.chain().unwrap().tip_block().unwrap();

        let block = Block::create(
            vec![Transaction::coinbase(miner.pubkey_hash(), "", 100)],
            Some(tip.hash),
            1,
            4,
        )
        .unwrap();
        let block_hex = hex::encode(block.to_bytes());

        let first = call(&state, "submitblock", Some(json!([block_hex.clone()]))).await;
        assert_eq!(first.result.unwrap()["outcome"], json!("Extended"));

        let again = call(&state, "submitblock", Some(json!([block_hex]))).await;
        assert_eq!(again.result.unwrap()["outcome"], json!("Duplicate"));

        let garbage = call(&state, "submitblock", Some(json!(["zz"]))).await;
        assert_eq!(garbage.error.unwrap().code, JsonRpcError::DESERIALIZATION);
    }

    #[tokio::test]
    async fn test_errors() {
        let miner = KeyPair::generate();
        let state = test_state(&miner);

        let unknown = call(&state, "nosuchmethod", None).await;
        assert_eq!(unknown.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

        let missing = call(&state, "getblock", None).await;
        assert_eq!(missing.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let absent = call(&state, "getblock", Some(json!([Hash::zero().to_hex()]))).await;
        assert_eq!(absent.error.unwrap().code, JsonRpcError::NOT_FOUND);

        let bad_address = call(&state, "getbalance", Some(json!(["nope"]))).await;
        assert_eq!(bad_address.error.unwrap().code, JsonRpcError::NOT_FOUND);
    }
}
