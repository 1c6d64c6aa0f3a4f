//! Shared test helpers for integration tests
//!
//! This module provides helper functions used by the integration tests.
//!
//! The module is organized into several categories:
//! - **Configuration Builders**: test configurations with a fresh relayer key
//! - **Chain Data Builders**: CKB headers, deposit transactions and blocks
//! - **Mock Chains**: in-process `BlockSource` and `HandlerService` doubles

use async_trait::async_trait;
use ckb_relayer::ckb_client::{
    Block, BlockHeader, BlockSource, Byte32, CellInput, CellOutput, JsonBytes, OutPoint, Script,
    ScriptHashType, Transaction,
};
use ckb_relayer::config::Config;
use ckb_relayer::crypto::SignedMessage;
use ckb_relayer::error::{RelayError, RelayResult};
use ckb_relayer::muta_client::{BurnRequest, HandlerService, Receipt};
use k256::ecdsa::SigningKey;
use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Hash of the deposit used in the wire-format examples
#[allow(dead_code)]
pub const DUMMY_DEPOSIT_HASH: &str =
    "0xf56924db538e77bb5951eb5ff0d02b88983c49c45eea30e8ae3e7234b311436c";

/// Muta receiver address used in the wire-format examples (20 bytes)
#[allow(dead_code)]
pub const DUMMY_RECEIVER: &str = "0x016cbd9ee47a255a6f68882918dcdd9e14e6bee1";

/// Code hash of the deposit lock script
#[allow(dead_code)]
pub const DUMMY_LOCK_CODE_HASH: &str =
    "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8";

/// Muta chain id
#[allow(dead_code)]
pub const DUMMY_CHAIN_ID: &str =
    "0xb6a4d7da21443f5e816e8700eea87610e6d769657d6b8ec73028457bf2ca4036";

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build a valid in-memory test configuration with a fresh secp256k1 key.
/// The key is hex encoded and set as an environment variable which the
/// config references via private_key_env.
#[allow(dead_code)]
pub fn build_test_config() -> Config {
    let mut rng = rand::thread_rng();
    let signing_key = SigningKey::random(&mut rng);
    let private_key_hex = format!("0x{}", hex::encode(signing_key.to_bytes()));

    // Use unique env var names per invocation to avoid parallel test conflicts
    let unique_id: u64 = rng.gen();
    let private_key_env_name = format!("TEST_RELAYER_PRIVATE_KEY_{}", unique_id);
    std::env::set_var(&private_key_env_name, &private_key_hex);

    let mut config = Config::default();
    config.ckb.target_lock = deposit_lock();
    config.muta.chain_id = DUMMY_CHAIN_ID.parse().unwrap();
    config.relayer.private_key_env = private_key_env_name;
    config.relayer.idle_interval_ms = 10;
    config.relayer.block_interval_ms = 10;
    config.muta.receipt_poll_interval_ms = 10;
    config
}

/// Build a test configuration pointing both chain clients at a mock server.
#[allow(dead_code)]
pub fn build_test_config_with_mock_server(uri: &str) -> Config {
    let mut config = build_test_config();
    config.ckb.rpc_url = uri.to_string();
    config.muta.endpoint = format!("{}/graphql", uri);
    config
}

// ============================================================================
// CHAIN DATA BUILDERS
// ============================================================================

/// The target deposit lock script.
#[allow(dead_code)]
pub fn deposit_lock() -> Script {
    Script {
        code_hash: DUMMY_LOCK_CODE_HASH.parse().unwrap(),
        hash_type: ScriptHashType::Type,
        args: JsonBytes(vec![0xaa; 20]),
    }
}

/// An ordinary secp256k1-style lock that is not the deposit lock.
#[allow(dead_code)]
pub fn other_lock() -> Script {
    Script {
        code_hash: Byte32([0x11; 32]),
        hash_type: ScriptHashType::Type,
        args: JsonBytes(vec![0xbb; 20]),
    }
}

#[allow(dead_code)]
pub fn create_header(number: u64) -> BlockHeader {
    BlockHeader {
        version: 0,
        compact_target: 0x1e08_3126,
        timestamp: 1_600_000_000_000 + number * 8_000,
        number,
        epoch: 0x0708_0018_0000_0001,
        parent_hash: Byte32([number.wrapping_sub(1) as u8; 32]),
        transactions_root: Byte32([0x22; 32]),
        proposals_hash: Byte32([0x00; 32]),
        uncles_hash: Byte32([0x00; 32]),
        dao: Byte32([0x33; 32]),
        nonce: u128::from(number) << 64,
    }
}

fn create_input(index: u32) -> CellInput {
    CellInput {
        since: 0,
        previous_output: OutPoint {
            tx_hash: Byte32([0x44; 32]),
            index,
        },
    }
}

/// A deposit: `input_count` inputs, a single deposit-lock output whose data is
/// `amount` as 16 little-endian bytes, and `receiver` at witness `input_count`.
#[allow(dead_code)]
pub fn create_deposit_tx(hash: Byte32, input_count: u32, receiver: &[u8], amount: u128) -> Transaction {
    let mut witnesses: Vec<JsonBytes> = (0..input_count).map(|_| JsonBytes(vec![0x55; 85])).collect();
    witnesses.push(JsonBytes(receiver.to_vec()));

    Transaction {
        version: 0,
        cell_deps: vec![],
        header_deps: vec![],
        inputs: (0..input_count).map(create_input).collect(),
        outputs: vec![CellOutput {
            capacity: 142_0000_0000,
            lock: deposit_lock(),
            type_: None,
        }],
        outputs_data: vec![JsonBytes(amount.to_le_bytes().to_vec())],
        witnesses,
        hash,
    }
}

/// A transfer that does not touch the deposit lock.
#[allow(dead_code)]
pub fn create_plain_tx(hash: Byte32) -> Transaction {
    Transaction {
        version: 0,
        cell_deps: vec![],
        header_deps: vec![],
        inputs: vec![create_input(0)],
        outputs: vec![
            CellOutput {
                capacity: 100_0000_0000,
                lock: other_lock(),
                type_: None,
            },
            CellOutput {
                capacity: 50_0000_0000,
                lock: other_lock(),
                type_: None,
            },
        ],
        outputs_data: vec![JsonBytes(vec![]), JsonBytes(vec![])],
        witnesses: vec![JsonBytes(vec![0x55; 85])],
        hash,
    }
}

#[allow(dead_code)]
pub fn create_block(number: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        header: create_header(number),
        transactions,
    }
}

// ============================================================================
// MOCK CHAINS
// ============================================================================

#[derive(Default)]
struct MockCkbState {
    blocks: BTreeMap<u64, Block>,
    tip: u64,
    failing_fetches: usize,
    fetched: Vec<u64>,
}

/// In-process CKB chain. Clones share state.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct MockCkb {
    state: Arc<Mutex<MockCkbState>>,
}

#[allow(dead_code)]
impl MockCkb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block and raises the tip to it if needed.
    pub fn push_block(&self, block: Block) {
        let mut state = self.state.lock().unwrap();
        state.tip = state.tip.max(block.header.number);
        state.blocks.insert(block.header.number, block);
    }

    /// The next `count` block fetches fail with an RPC error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.state.lock().unwrap().failing_fetches = count;
    }

    /// Heights requested so far, in order.
    pub fn fetched(&self) -> Vec<u64> {
        self.state.lock().unwrap().fetched.clone()
    }
}

#[async_trait]
impl BlockSource for MockCkb {
    async fn tip_height(&self) -> RelayResult<u64> {
        Ok(self.state.lock().unwrap().tip)
    }

    async fn block(&self, height: u64) -> RelayResult<Block> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(height);
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(RelayError::Rpc(anyhow::anyhow!("connection reset by peer")));
        }
        state
            .blocks
            .get(&height)
            .cloned()
            .ok_or_else(|| RelayError::Rpc(anyhow::anyhow!("no block at height {}", height)))
    }
}

#[derive(Default)]
struct MockMutaState {
    messages: Vec<SignedMessage>,
    header_batches: Vec<Vec<BlockHeader>>,
    burns: Vec<BurnRequest>,
    submit_failures: VecDeque<RelayError>,
    next_receipt: u8,
}

impl MockMutaState {
    fn receipt(&mut self) -> Receipt {
        self.next_receipt = self.next_receipt.wrapping_add(1);
        Receipt {
            tx_hash: Byte32([self.next_receipt; 32]),
            height: u64::from(self.next_receipt),
        }
    }
}

/// In-process `ckb_handler` service recording every call. Clones share state.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct MockMuta {
    state: Arc<Mutex<MockMutaState>>,
}

#[allow(dead_code)]
impl MockMuta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error returned by the next `submit_message` call.
    pub fn fail_next_submit(&self, error: RelayError) {
        self.state.lock().unwrap().submit_failures.push_back(error);
    }

    /// Every `submit_message` attempt, including failed ones.
    pub fn messages(&self) -> Vec<SignedMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn header_batches(&self) -> Vec<Vec<BlockHeader>> {
        self.state.lock().unwrap().header_batches.clone()
    }

    pub fn burns(&self) -> Vec<BurnRequest> {
        self.state.lock().unwrap().burns.clone()
    }
}

#[async_trait]
impl HandlerService for MockMuta {
    async fn update_headers(&self, headers: &[BlockHeader]) -> RelayResult<Receipt> {
        let mut state = self.state.lock().unwrap();
        state.header_batches.push(headers.to_vec());
        Ok(state.receipt())
    }

    async fn submit_message(&self, message: &SignedMessage) -> RelayResult<Receipt> {
        let mut state = self.state.lock().unwrap();
        state.messages.push(message.clone());
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }
        Ok(state.receipt())
    }

    async fn burn_sudt(&self, request: &BurnRequest) -> RelayResult<Receipt> {
        let mut state = self.state.lock().unwrap();
        state.burns.push(request.clone());
        Ok(state.receipt())
    }
}
