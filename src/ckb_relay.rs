//! CKB Relay Service
//!
//! The sync loop: follows the CKB chain one block at a time and relays every
//! deposit to the Muta `ckb_handler` service.
//!
//! ## Overview
//!
//! Each iteration either waits for the chain to grow or processes the block
//! right above the height cursor:
//! 1. Fetch the block at `cursor + 1`
//! 2. Detect deposits locked by the target lock script
//! 3. If there are any, build, encode, sign and submit the mint batch
//! 4. Buffer the block header (and flush the buffer if configured)
//! 5. Persist the cursor at the block's height
//!
//! A failed attempt leaves the cursor untouched, so the same height is tried
//! again after whatever delay the retry policy picks. Heights are never
//! skipped and never processed concurrently.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: CKB headers are not verified. Muta trusts this relayer's key
//! to only sign batches built from the canonical chain.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::ckb_client::{BlockHeader, BlockSource};
use crate::config::Config;
use crate::crypto::CryptoService;
use crate::detector::CrossTxDetector;
use crate::error::{RelayError, RelayResult};
use crate::mint::{build_batch, codec::encode_batch};
use crate::muta_client::{HandlerService, Receipt};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::storage::{CursorStore, HeaderStore};

// ============================================================================
// RELAY CONFIGURATION
// ============================================================================

/// Timing and state parameters of the sync loop.
#[derive(Debug, Clone)]
pub struct CkbRelayConfig {
    /// Height treated as processed when the cursor store is empty
    pub initial_height: u64,
    /// Sleep when caught up with the tip
    pub idle_interval: Duration,
    /// Sleep after each processed block
    pub block_interval: Duration,
    /// Flush the header buffer once it holds this many headers
    pub header_flush_threshold: Option<usize>,
}

impl CkbRelayConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_height: config.relayer.initial_height,
            idle_interval: Duration::from_millis(config.relayer.idle_interval_ms),
            block_interval: Duration::from_millis(config.relayer.block_interval_ms),
            header_flush_threshold: config.relayer.header_flush_threshold,
        }
    }
}

/// Outcome of one successful loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `cursor + 1` is above the tip; nothing to do yet
    Idle { cursor: u64, tip: u64 },
    /// The block at `height` was fully processed and the cursor advanced
    Processed {
        height: u64,
        deposits: usize,
        /// Present when a mint batch was submitted and acknowledged
        receipt: Option<Receipt>,
    },
}

// ============================================================================
// CKB RELAY
// ============================================================================

/// The sync loop with all of its collaborators injected.
pub struct CkbRelay {
    config: CkbRelayConfig,
    detector: CrossTxDetector,
    source: Box<dyn BlockSource>,
    sink: Box<dyn HandlerService>,
    signer: CryptoService,
    cursor: Box<dyn CursorStore>,
    headers: Box<dyn HeaderStore>,
    policy: Box<dyn RetryPolicy>,
    consecutive_failures: u32,
}

impl CkbRelay {
    /// Creates the relay.
    ///
    /// # Arguments
    ///
    /// * `config` - Service configuration (target lock script and loop timing)
    /// * `source` - CKB block source
    /// * `sink` - Muta handler service
    /// * `signer` - Key signing the mint batches
    /// * `cursor` - Height cursor store
    /// * `headers` - Header buffer store
    /// * `policy` - Retry policy for failed attempts
    pub fn new(
        config: &Config,
        source: impl BlockSource + 'static,
        sink: impl HandlerService + 'static,
        signer: CryptoService,
        cursor: impl CursorStore + 'static,
        headers: impl HeaderStore + 'static,
        policy: impl RetryPolicy + 'static,
    ) -> Self {
        if config.relayer.header_flush_threshold.is_none() {
            warn!(
                "relayer.header_flush_threshold is unset: headers are buffered on every block \
                 but never sent to update_headers, so the buffer grows without bound"
            );
        }

        Self {
            config: CkbRelayConfig::from_config(config),
            detector: CrossTxDetector::new(config.ckb.target_lock.clone()),
            source: Box::new(source),
            sink: Box::new(sink),
            signer,
            cursor: Box::new(cursor),
            headers: Box::new(headers),
            policy: Box::new(policy),
            consecutive_failures: 0,
        }
    }

    /// Height of the last fully processed block.
    pub async fn current_height(&self) -> RelayResult<u64> {
        Ok(self.cursor.load().await?.unwrap_or(self.config.initial_height))
    }

    /// Runs the loop until the retry policy halts it.
    pub async fn run(&mut self) -> RelayResult<()> {
        info!(
            "Starting CKB relay: start height={}, idle_interval={}ms, block_interval={}ms",
            self.current_height().await?,
            self.config.idle_interval.as_millis(),
            self.config.block_interval.as_millis()
        );

        loop {
            match self.run_once().await {
                Ok(Step::Idle { .. }) => {
                    tokio::time::sleep(self.config.idle_interval).await;
                }
                Ok(Step::Processed { .. }) => {
                    tokio::time::sleep(self.config.block_interval).await;
                }
                Err(e) => match self.policy.on_failure(&e, self.consecutive_failures) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            "Retrying in {}ms (consecutive failures: {})",
                            delay.as_millis(),
                            self.consecutive_failures
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::Halt => {
                        error!("Relay halted: {}", e);
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Performs one iteration without sleeping.
    ///
    /// On error the cursor has not moved and the failure has been logged and
    /// counted; the caller decides when to try again.
    pub async fn run_once(&mut self) -> RelayResult<Step> {
        let result = self.step().await;

        match &result {
            Ok(Step::Processed { .. }) => {
                self.consecutive_failures = 0;
                self.policy.on_success();
            }
            Ok(Step::Idle { .. }) => {}
            Err(_) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
        }

        result
    }

    async fn step(&self) -> RelayResult<Step> {
        let cursor = self.current_height().await.map_err(|e| {
            error!("Failed to read height cursor: {}", e);
            e
        })?;
        let height = cursor.checked_add(1).ok_or_else(|| {
            error!("Height cursor {} has no successor", cursor);
            RelayError::HeightOverflow(cursor)
        })?;

        let tip = self.source.tip_height().await.map_err(|e| {
            error!("Failed to query CKB tip (next height {}): {}", height, e);
            e
        })?;

        if height > tip {
            debug!("Caught up: cursor={}, tip={}", cursor, tip);
            return Ok(Step::Idle { cursor, tip });
        }

        self.process_block(height).await.map_err(|e| {
            error!("Failed to process CKB block {}: {}", height, e);
            e
        })
    }

    /// Processes the block at `height`, advancing the cursor last.
    async fn process_block(&self, height: u64) -> RelayResult<Step> {
        let block = self.source.block(height).await?;
        if block.header.number != height {
            return Err(RelayError::DataShape(format!(
                "requested block {} but node returned header number {}",
                height, block.header.number
            )));
        }

        let deposits = self.detector.detect(&block.transactions);
        let receipt = if deposits.is_empty() {
            debug!("Block {}: no deposits among {} transactions", height, block.transactions.len());
            None
        } else {
            let batch = build_batch(&deposits)?;
            let message = self.signer.sign_payload(encode_batch(&batch))?;

            info!(
                "Block {}: submitting {} deposit(s), payload {} bytes",
                height,
                batch.len(),
                message.payload.len()
            );

            match self.sink.submit_message(&message).await {
                Ok(receipt) => {
                    info!("Block {}: mint batch accepted, receipt {}", height, receipt);
                    Some(receipt)
                }
                Err(RelayError::Duplicate(reason)) => {
                    warn!("Block {}: mint batch already applied ({})", height, reason);
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let deposit_count = deposits.len();
        self.buffer_header(block.header).await?;
        self.flush_headers_if_due().await?;

        self.cursor.save(height).await?;
        info!("Advanced height cursor to {}", height);

        Ok(Step::Processed {
            height,
            deposits: deposit_count,
            receipt,
        })
    }

    /// Appends the header unless a previous attempt at this height already did.
    async fn buffer_header(&self, header: BlockHeader) -> RelayResult<()> {
        if self.headers.last_number().await? == Some(header.number) {
            debug!("Header {} already buffered", header.number);
            return Ok(());
        }
        self.headers.append(header).await
    }

    async fn flush_headers_if_due(&self) -> RelayResult<()> {
        let Some(threshold) = self.config.header_flush_threshold else {
            return Ok(());
        };
        if self.headers.len().await? < threshold {
            return Ok(());
        }

        let headers = self.headers.read_all().await?;
        match self.sink.update_headers(&headers).await {
            Ok(receipt) => info!("Flushed {} header(s), receipt {}", headers.len(), receipt),
            Err(RelayError::Duplicate(reason)) => {
                warn!("Header batch already applied ({})", reason)
            }
            Err(e) => return Err(e),
        }
        self.headers.clear().await
    }
}
