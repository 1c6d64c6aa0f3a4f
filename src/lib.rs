//! CKB Relayer Library
//!
//! This crate relays cross-chain deposits from CKB to Muta. It follows the CKB
//! chain block by block, turns deposits into signed mint batches and submits
//! them to the Muta `ckb_handler` service.

pub mod ckb_client;
pub mod ckb_relay;
pub mod config;
pub mod crypto;
pub mod detector;
pub mod error;
pub mod mint;
pub mod muta_client;
pub mod retry;
pub mod storage;

// Re-export commonly used types
pub use ckb_client::{Block, BlockHeader, BlockSource, CkbClient, Script, Transaction};
pub use ckb_relay::{CkbRelay, Step};
pub use config::Config;
pub use crypto::{CryptoService, SignedMessage};
pub use detector::CrossTxDetector;
pub use error::{ErrorClass, RelayError, RelayResult};
pub use mint::{MintBatch, MintInstruction};
pub use muta_client::{HandlerService, MutaClient, Receipt};
pub use retry::{ExponentialBackoff, FixedDelay, RetryDecision, RetryPolicy};
pub use storage::{CursorStore, HeaderStore};
