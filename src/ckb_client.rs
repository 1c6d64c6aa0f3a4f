//! CKB Client Module
//!
//! This module provides a client for communicating with a CKB node via its
//! JSON-RPC API, together with the typed block, header and transaction model
//! the relay works on. Every RPC payload is decoded into explicit structs so a
//! node that serves a malformed block fails fast instead of leaking missing
//! fields into the mint pipeline.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{RelayError, RelayResult};

// ============================================================================
// HEX ENCODED PRIMITIVES
// ============================================================================

/// Serde codec for `0x`-prefixed hex quantities (`"0x1a"`), the way CKB
/// encodes every integer on the wire.
pub mod quantity {
    use super::*;
    use serde::de::Error as _;
    use std::num::ParseIntError;

    /// Integer types that travel as hex quantities.
    pub trait Quantity: Sized + Copy {
        fn from_hex_digits(digits: &str) -> Result<Self, ParseIntError>;
        fn to_quantity(self) -> String;
    }

    macro_rules! impl_quantity {
        ($($t:ty),*) => {$(
            impl Quantity for $t {
                fn from_hex_digits(digits: &str) -> Result<Self, ParseIntError> {
                    <$t>::from_str_radix(digits, 16)
                }

                fn to_quantity(self) -> String {
                    format!("0x{:x}", self)
                }
            }
        )*};
    }

    impl_quantity!(u32, u64, u128);

    /// Parses a quantity string, rejecting a missing prefix or empty digits.
    pub fn parse<T: Quantity>(value: &str) -> Result<T, String> {
        let digits = value
            .strip_prefix("0x")
            .ok_or_else(|| format!("quantity '{}' is missing the 0x prefix", value))?;
        if digits.is_empty() {
            return Err(format!("quantity '{}' has no digits", value));
        }
        T::from_hex_digits(digits).map_err(|e| format!("invalid quantity '{}': {}", value, e))
    }

    pub fn serialize<T: Quantity, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_quantity())
    }

    pub fn deserialize<'de, T: Quantity, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}

/// Decodes `0x`-prefixed (or bare) hex into bytes.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(digits).map_err(|e| format!("invalid hex '{}': {}", value, e))
}

/// A 32-byte hash (transaction hash, code hash, header hashes, dao field).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Byte32(pub [u8; 32]);

impl Byte32 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Byte32 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {} in '{}'", b.len(), s))?;
        Ok(Byte32(array))
    }
}

impl fmt::Display for Byte32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Byte32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Byte32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Byte32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Variable-length byte string (`outputs_data`, `witnesses`, script `args`).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonBytes(pub Vec<u8>);

impl JsonBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for JsonBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with("0x") {
            return Err(format!("bytes '{}' are missing the 0x prefix", s));
        }
        decode_hex(s).map(JsonBytes)
    }
}

impl fmt::Display for JsonBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for JsonBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for JsonBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for JsonBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

// ============================================================================
// CHAIN DATA STRUCTURES
// ============================================================================

/// How a script's `code_hash` is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptHashType {
    Data,
    Type,
    Data1,
    Data2,
}

/// Lock or type script. Equality is structural over all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Script {
    pub code_hash: Byte32,
    pub hash_type: ScriptHashType,
    pub args: JsonBytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: Byte32,
    #[serde(with = "quantity")]
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellInput {
    #[serde(with = "quantity")]
    pub since: u64,
    pub previous_output: OutPoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(with = "quantity")]
    pub capacity: u64,
    pub lock: Script,
    #[serde(rename = "type", default)]
    pub type_: Option<Script>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    Code,
    DepGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

/// A transaction as served inside a CKB block, including its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "quantity")]
    pub version: u32,
    pub cell_deps: Vec<CellDep>,
    pub header_deps: Vec<Byte32>,
    pub inputs: Vec<CellInput>,
    pub outputs: Vec<CellOutput>,
    pub outputs_data: Vec<JsonBytes>,
    pub witnesses: Vec<JsonBytes>,
    pub hash: Byte32,
}

/// CKB block header. Serializes to exactly the header shape the Muta
/// `ckb_handler` service expects in `update_headers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(with = "quantity")]
    pub version: u32,
    #[serde(with = "quantity")]
    pub compact_target: u32,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    #[serde(with = "quantity")]
    pub number: u64,
    #[serde(with = "quantity")]
    pub epoch: u64,
    pub parent_hash: Byte32,
    pub transactions_root: Byte32,
    pub proposals_hash: Byte32,
    /// Renamed to `extra_hash` by newer nodes
    #[serde(alias = "extra_hash")]
    pub uncles_hash: Byte32,
    pub dao: Byte32,
    #[serde(with = "quantity")]
    pub nonce: u128,
}

/// A block fetched by height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

// ============================================================================
// JSON-RPC WIRE STRUCTURES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<serde_json::Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ============================================================================
// BLOCK SOURCE
// ============================================================================

/// Read access to Chain A, as needed by the sync loop.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the current chain tip.
    async fn tip_height(&self) -> RelayResult<u64>;

    /// The block at `height`, which must not be above the tip.
    async fn block(&self, height: u64) -> RelayResult<Block>;
}

// ============================================================================
// CKB CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with a CKB node via JSON-RPC
pub struct CkbClient {
    /// HTTP client for making requests
    client: Client,
    /// URL of the CKB node (e.g., "http://127.0.0.1:8114")
    rpc_url: String,
    /// Monotonic JSON-RPC request id
    next_id: AtomicU64,
}

impl CkbClient {
    /// Creates a new CKB client for the given node URL.
    ///
    /// # Arguments
    ///
    /// * `rpc_url` - URL of the CKB node (e.g., "http://127.0.0.1:8114")
    pub fn new(rpc_url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Queries the height of the chain tip (`get_tip_block_number`).
    pub async fn get_tip_block_number(&self) -> RelayResult<u64> {
        let raw: String = self.call("get_tip_block_number", vec![]).await?;
        quantity::parse(&raw).map_err(RelayError::DataShape)
    }

    /// Fetches the block at `height` (`get_block_by_number`).
    ///
    /// A `null` result means the node does not have the block yet, which is
    /// reported as an RPC failure so the height is retried.
    pub async fn get_block_by_number(&self, height: u64) -> RelayResult<Block> {
        let block: Option<Block> = self
            .call(
                "get_block_by_number",
                vec![serde_json::Value::String(format!("0x{:x}", height))],
            )
            .await?;

        block.ok_or_else(|| {
            RelayError::Rpc(anyhow::anyhow!(
                "CKB node {} returned no block at height {}",
                self.rpc_url,
                height
            ))
        })
    }

    /// Sends one JSON-RPC call and decodes its result.
    ///
    /// Transport and node-side errors map to [`RelayError::Rpc`]; a result
    /// that does not match `T` maps to [`RelayError::DataShape`].
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> RelayResult<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        debug!("CKB rpc {} -> {}", method, self.rpc_url);

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to send {} request to {}", method, self.rpc_url))
            .map_err(RelayError::Rpc)?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.rpc_url))
            .map_err(RelayError::Rpc)?;

        if let Some(error) = response.error {
            return Err(RelayError::Rpc(anyhow::anyhow!(
                "JSON-RPC error from {}: {} (code: {})",
                self.rpc_url,
                error.message,
                error.code
            )));
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result)
            .map_err(|e| RelayError::DataShape(format!("{} returned unexpected shape: {}", method, e)))
    }
}

#[async_trait]
impl BlockSource for CkbClient {
    async fn tip_height(&self) -> RelayResult<u64> {
        self.get_tip_block_number().await
    }

    async fn block(&self, height: u64) -> RelayResult<Block> {
        self.get_block_by_number(height).await
    }
}
