//! Muta Client Module
//!
//! Binding for the `ckb_handler` service on the Muta chain. Every service call
//! is a signed Muta transaction sent through the node's GraphQL
//! `sendTransaction` mutation. Mempool admission is not an acknowledgement:
//! the client polls `getReceipt` until the transaction is committed and only
//! returns a [`Receipt`] when the service responded with code 0. A transaction
//! still uncommitted once Muta passes its timeout height is reported as a
//! retryable rejection.
//!
//! The transaction hash is `keccak256(rlp([chain_id, nonce, timeout,
//! cycles_price, cycles_limit, service_name, method, payload]))` and is signed
//! with the relayer key (64-byte compact signature, 33-byte compressed key).

use alloy_rlp::{length_of_length, BufMut, Encodable, Header};
use anyhow::Context;
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ckb_client::{BlockHeader, Byte32};
use crate::config::MutaConfig;
use crate::crypto::{keccak256, CryptoService, SignedMessage};
use crate::error::{RelayError, RelayResult};

// ============================================================================
// HANDLER SERVICE DATA STRUCTURES
// ============================================================================

/// Acknowledgement that Muta executed a service call successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the Muta transaction carrying the call
    pub tx_hash: Byte32,
    /// Muta block that committed the transaction
    pub height: u64,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tx_hash)
    }
}

#[derive(Debug, Serialize)]
struct UpdateHeadersPayload<'a> {
    headers: &'a [BlockHeader],
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    payload: String,
    signature: String,
}

/// Reverse-direction request: burn Muta-side assets to release them on CKB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRequest {
    /// Asset id (the CKB deposit hash the asset was minted under)
    pub asset_id: Byte32,
    /// Hex-encoded CKB address receiving the released funds
    pub receiver: String,
    /// Amount to cross back
    pub amount: u64,
}

// ============================================================================
// HANDLER SERVICE
// ============================================================================

/// Write access to the `ckb_handler` service on Chain B.
#[async_trait]
pub trait HandlerService: Send + Sync {
    /// Relays a batch of CKB headers to the handler's header tracker.
    async fn update_headers(&self, headers: &[BlockHeader]) -> RelayResult<Receipt>;

    /// Submits a signed mint batch.
    async fn submit_message(&self, message: &SignedMessage) -> RelayResult<Receipt>;

    /// Burns Muta-side assets. Not called by the relay loop.
    async fn burn_sudt(&self, request: &BurnRequest) -> RelayResult<Receipt>;
}

// ============================================================================
// MUTA TRANSACTIONS
// ============================================================================

/// Unsigned Muta transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub chain_id: Byte32,
    /// Random replay-protection nonce
    pub nonce: Byte32,
    /// Last Muta height at which the transaction may be included
    pub timeout: u64,
    pub cycles_price: u64,
    pub cycles_limit: u64,
    pub service_name: String,
    pub method: String,
    /// JSON-encoded method arguments
    pub payload: String,
}

impl RawTransaction {
    fn rlp_payload_length(&self) -> usize {
        self.chain_id.as_bytes().length()
            + self.nonce.as_bytes().length()
            + self.timeout.length()
            + self.cycles_price.length()
            + self.cycles_limit.length()
            + self.service_name.as_str().length()
            + self.method.as_str().length()
            + self.payload.as_str().length()
    }

    /// Keccak-256 of the RLP-encoded transaction.
    pub fn tx_hash(&self) -> Byte32 {
        Byte32(keccak256(&alloy_rlp::encode(self)))
    }
}

impl Encodable for RawTransaction {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.rlp_payload_length(),
        }
        .encode(out);
        self.chain_id.as_bytes().encode(out);
        self.nonce.as_bytes().encode(out);
        self.timeout.encode(out);
        self.cycles_price.encode(out);
        self.cycles_limit.encode(out);
        self.service_name.as_str().encode(out);
        self.method.as_str().encode(out);
        self.payload.as_str().encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + length_of_length(payload_length)
    }
}

/// A raw transaction plus the relayer's authorization.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: RawTransaction,
    pub tx_hash: Byte32,
    pub pubkey: Vec<u8>,
    pub signature: [u8; 64],
}

/// Muta-style nonce: keccak256 over fresh random bytes.
pub fn random_nonce() -> Byte32 {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    Byte32(keccak256(&seed))
}

// ============================================================================
// GRAPHQL WIRE STRUCTURES
// ============================================================================

const SEND_TRANSACTION_MUTATION: &str = "mutation sendTransaction($inputRaw: InputRawTransaction!, $inputEncryption: InputTransactionEncryption!) { sendTransaction(inputRaw: $inputRaw, inputEncryption: $inputEncryption) }";

const LATEST_HEIGHT_QUERY: &str = "query { getBlock { header { height } } }";

const GET_RECEIPT_QUERY: &str = "query getReceipt($txHash: Hash!) { getReceipt(txHash: $txHash) { txHash height response { response { code errorMessage } } } }";

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendTransactionData {
    send_transaction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetBlockData {
    get_block: BlockData,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    header: HeaderData,
}

#[derive(Debug, Deserialize)]
struct HeaderData {
    height: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetReceiptData {
    get_receipt: Option<ReceiptData>,
}

#[derive(Debug, Deserialize)]
struct ReceiptData {
    height: String,
    response: ReceiptResponseData,
}

#[derive(Debug, Deserialize)]
struct ReceiptResponseData {
    response: ServiceResponseData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResponseData {
    code: String,
    #[serde(default)]
    error_message: String,
}

/// Maps a GraphQL error message onto the relay error taxonomy.
///
/// A message reporting an already-known transaction or an already-processed
/// deposit is a [`RelayError::Duplicate`]. Authorization, chain id and payload
/// decoding failures cannot succeed on retry and are permanent rejections;
/// anything else (mempool full, node busy) is retryable.
pub fn classify_rejection(message: &str) -> RelayError {
    let lower = message.to_lowercase();

    if lower.contains("already") || lower.contains("dup") {
        return RelayError::Duplicate(message.to_string());
    }

    let permanent = [
        "checkauthorization",
        "invalid chain",
        "invalidchainid",
        "signature",
        "decode",
        "malformed",
        "invalid payload",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    RelayError::Rejected {
        message: message.to_string(),
        permanent,
    }
}

fn parse_uint64(raw: &str) -> RelayResult<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RelayError::DataShape(format!("invalid Muta Uint64 '{}': {}", raw, e)))
}

// ============================================================================
// MUTA CLIENT IMPLEMENTATION
// ============================================================================

/// Client for the `ckb_handler` service of a Muta node.
pub struct MutaClient {
    /// HTTP client for making requests
    client: Client,
    /// GraphQL endpoint (e.g., "http://127.0.0.1:8000/graphql")
    endpoint: String,
    /// Chain binding and fee parameters
    config: MutaConfig,
    /// Signs outgoing transactions
    signer: CryptoService,
}

impl MutaClient {
    /// Creates a new Muta client.
    ///
    /// # Arguments
    ///
    /// * `config` - Muta endpoint, chain id and transaction parameters
    /// * `signer` - Key authorizing the transactions
    pub fn new(config: &MutaConfig, signer: CryptoService) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            config: config.clone(),
            signer,
        })
    }

    /// Queries the latest Muta block height.
    pub async fn get_latest_height(&self) -> RelayResult<u64> {
        let data: GetBlockData = self
            .graphql(LATEST_HEIGHT_QUERY, serde_json::json!({}))
            .await?;
        parse_uint64(&data.get_block.header.height)
    }

    /// Builds an unsigned call to `method` that expires `timeout_gap` blocks
    /// after `current_height`.
    pub fn build_raw_transaction(&self, method: &str, payload: String, current_height: u64) -> RawTransaction {
        RawTransaction {
            chain_id: self.config.chain_id,
            nonce: random_nonce(),
            timeout: current_height.saturating_add(self.config.timeout_gap),
            cycles_price: self.config.cycles_price,
            cycles_limit: self.config.cycles_limit,
            service_name: self.config.service_name.clone(),
            method: method.to_string(),
            payload,
        }
    }

    pub fn sign_transaction(&self, raw: RawTransaction) -> RelayResult<SignedTransaction> {
        let tx_hash = raw.tx_hash();
        let signature = self.signer.sign_digest(tx_hash.as_bytes())?;

        Ok(SignedTransaction {
            raw,
            tx_hash,
            pubkey: self.signer.public_key_compressed(),
            signature,
        })
    }

    /// Sends a signed transaction and returns the hash Muta assigned to it.
    /// Success only means the mempool accepted the transaction.
    pub async fn send_transaction(&self, tx: &SignedTransaction) -> RelayResult<Byte32> {
        let variables = serde_json::json!({
            "inputRaw": {
                "chainId": tx.raw.chain_id.to_string(),
                "nonce": tx.raw.nonce.to_string(),
                "timeout": format!("0x{:x}", tx.raw.timeout),
                "cyclesPrice": format!("0x{:x}", tx.raw.cycles_price),
                "cyclesLimit": format!("0x{:x}", tx.raw.cycles_limit),
                "serviceName": tx.raw.service_name,
                "method": tx.raw.method,
                "payload": tx.raw.payload,
            },
            "inputEncryption": {
                "txHash": tx.tx_hash.to_string(),
                "pubkey": format!("0x{}", hex::encode(&tx.pubkey)),
                "signature": format!("0x{}", hex::encode(tx.signature)),
            }
        });

        let data: SendTransactionData = self.graphql(SEND_TRANSACTION_MUTATION, variables).await?;
        data.send_transaction.parse().map_err(|e| {
            RelayError::DataShape(format!("sendTransaction returned an invalid hash: {}", e))
        })
    }

    /// Looks up the execution receipt of a transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Receipt))` - Committed and the service returned code 0
    /// * `Ok(None)` - Not committed yet
    /// * `Err(RelayError)` - Committed with a non-zero code (classified like a
    ///   GraphQL error message), or the lookup itself failed
    pub async fn get_receipt(&self, tx_hash: &Byte32) -> RelayResult<Option<Receipt>> {
        let response: GraphQlResponse<GetReceiptData> = self
            .graphql_response(GET_RECEIPT_QUERY, serde_json::json!({ "txHash": tx_hash.to_string() }))
            .await?;

        // Muta answers a lookup of an uncommitted transaction with an error
        if let Some(error) = response.errors.first() {
            debug!("No receipt for {} yet: {}", tx_hash, error.message);
            return Ok(None);
        }
        let Some(receipt) = response.data.and_then(|data| data.get_receipt) else {
            return Ok(None);
        };

        let service_response = receipt.response.response;
        let code = parse_uint64(&service_response.code)?;
        if code != 0 {
            return Err(classify_rejection(&format!(
                "transaction {} failed with code {}: {}",
                tx_hash, code, service_response.error_message
            )));
        }

        Ok(Some(Receipt {
            tx_hash: *tx_hash,
            height: parse_uint64(&receipt.height)?,
        }))
    }

    /// Polls for the receipt of `tx_hash` until it is committed or the Muta
    /// height passes `timeout`, the last height the transaction may land in.
    pub async fn wait_for_receipt(&self, tx_hash: &Byte32, timeout: u64) -> RelayResult<Receipt> {
        let interval = Duration::from_millis(self.config.receipt_poll_interval_ms);

        loop {
            if let Some(receipt) = self.get_receipt(tx_hash).await? {
                return Ok(receipt);
            }

            let height = self.get_latest_height().await?;
            if height > timeout {
                // The transaction may have landed in the timeout block itself
                if let Some(receipt) = self.get_receipt(tx_hash).await? {
                    return Ok(receipt);
                }
                warn!("Transaction {} expired: Muta height {} is past timeout {}", tx_hash, height, timeout);
                return Err(RelayError::Rejected {
                    message: format!("transaction {} expired at Muta height {} without a receipt", tx_hash, timeout),
                    permanent: false,
                });
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Builds, signs and sends a call to the handler service.
    async fn call_service<P: Serialize>(&self, method: &str, payload: &P) -> RelayResult<Receipt> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| RelayError::Encoding(format!("Failed to encode {} payload: {}", method, e)))?;

        let height = self.get_latest_height().await?;
        let signed = self.sign_transaction(self.build_raw_transaction(method, payload, height))?;

        debug!(
            "Sending {}.{} tx {} (timeout {})",
            self.config.service_name, method, signed.tx_hash, signed.raw.timeout
        );

        let tx_hash = self.send_transaction(&signed).await?;
        debug!("{}.{} tx {} in mempool, waiting for receipt", self.config.service_name, method, tx_hash);

        let receipt = self.wait_for_receipt(&tx_hash, signed.raw.timeout).await?;
        info!(
            "{}.{} committed at Muta height {}: {}",
            self.config.service_name, method, receipt.height, receipt
        );
        Ok(receipt)
    }

    /// Sends one GraphQL operation and decodes its `data`.
    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: serde_json::Value) -> RelayResult<T> {
        let response: GraphQlResponse<T> = self.graphql_response(query, variables).await?;

        if let Some(error) = response.errors.first() {
            return Err(classify_rejection(&error.message));
        }

        response
            .data
            .ok_or_else(|| RelayError::DataShape("GraphQL response carried neither data nor errors".to_string()))
    }

    /// Sends one GraphQL operation and returns the raw response envelope.
    async fn graphql_response<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> RelayResult<GraphQlResponse<T>> {
        let request = GraphQlRequest { query, variables };

        self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Failed to send GraphQL request to {}", self.endpoint))
            .map_err(RelayError::Rpc)?
            .json()
            .await
            .with_context(|| format!("Failed to parse GraphQL response from {}", self.endpoint))
            .map_err(RelayError::Rpc)
    }
}

#[async_trait]
impl HandlerService for MutaClient {
    async fn update_headers(&self, headers: &[BlockHeader]) -> RelayResult<Receipt> {
        self.call_service("update_headers", &UpdateHeadersPayload { headers })
            .await
    }

    async fn submit_message(&self, message: &SignedMessage) -> RelayResult<Receipt> {
        let payload = MessagePayload {
            payload: message.payload_hex(),
            signature: message.signature_hex(),
        };
        self.call_service("submit_message", &payload).await
    }

    async fn burn_sudt(&self, request: &BurnRequest) -> RelayResult<Receipt> {
        self.call_service("burn_sudt", request).await
    }
}
