//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the CKB relayer.
//! Configuration includes the CKB node endpoint and deposit lock script, the Muta
//! handler service endpoint, relay timing and the location of persisted state.

use serde::{Deserialize, Serialize};

use crate::ckb_client::{Byte32, JsonBytes, Script, ScriptHashType};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source chain (CKB) configuration
    pub ckb: CkbConfig,
    /// Destination chain (Muta) configuration
    pub muta: MutaConfig,
    /// Relay loop configuration (keys, timing, state)
    pub relayer: RelayerConfig,
}

/// Configuration for the CKB source chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CkbConfig {
    /// JSON-RPC endpoint of the CKB node
    pub rpc_url: String,
    /// Lock script a deposit output must carry to be relayed
    pub target_lock: Script,
}

/// Configuration for the Muta destination chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutaConfig {
    /// GraphQL endpoint of the Muta node
    pub endpoint: String,
    /// Chain id (32-byte hash) the transactions are bound to
    pub chain_id: Byte32,
    /// Service exposing `update_headers`/`submit_message`/`burn_sudt`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Cycles limit attached to every transaction
    #[serde(default = "default_cycles_limit")]
    pub cycles_limit: u64,
    /// Cycles price attached to every transaction
    #[serde(default = "default_cycles_price")]
    pub cycles_price: u64,
    /// Transactions expire this many Muta blocks after the current height
    #[serde(default = "default_timeout_gap")]
    pub timeout_gap: u64,
    /// Delay between receipt lookups while a transaction is pending, in milliseconds
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
}

fn default_service_name() -> String {
    "ckb_handler".to_string()
}

fn default_cycles_limit() -> u64 {
    0xffff_ffff
}

fn default_cycles_price() -> u64 {
    1
}

fn default_timeout_gap() -> u64 {
    20
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

/// Relay loop configuration including the signing key and timing parameters.
///
/// Keys are loaded from environment variables at runtime for security.
/// The config file contains the environment variable name, not the actual key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Environment variable name containing the secp256k1 private key (hex)
    /// Default: "RELAYER_PRIVATE_KEY"
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    /// Directory holding the height cursor and header buffer files
    pub state_dir: String,
    /// Height treated as already processed on first start
    #[serde(default)]
    pub initial_height: u64,
    /// Sleep when the cursor has caught up with the tip, in milliseconds
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Sleep after each relayed block, in milliseconds
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    /// Flush buffered headers to `update_headers` once this many are queued
    #[serde(default)]
    pub header_flush_threshold: Option<usize>,
    /// Backoff applied to failed block attempts
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

fn default_idle_interval_ms() -> u64 {
    1000
}

fn default_block_interval_ms() -> u64 {
    5000
}

impl RelayerConfig {
    /// Loads the private key from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The private key (hex encoded)
    /// * `Err(anyhow::Error)` - Failed to load from environment
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the relayer secp256k1 private key (hex encoded).",
                self.private_key_env
            )
        })
    }
}

/// Exponential backoff parameters for failed block attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay after the first failure, in milliseconds
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay, in milliseconds
    pub max_backoff_ms: u64,
    /// Growth factor applied per consecutive failure
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            multiplier: 2,
        }
    }
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates endpoints, timing and retry parameters.
    ///
    /// An unset `relayer.header_flush_threshold` is accepted; headers are then
    /// buffered without limit and only an external caller can drain them.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - A field is out of range or malformed
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.ckb.rpc_url).map_err(|e| {
            anyhow::anyhow!("Configuration error: invalid ckb.rpc_url '{}': {}", self.ckb.rpc_url, e)
        })?;
        url::Url::parse(&self.muta.endpoint).map_err(|e| {
            anyhow::anyhow!("Configuration error: invalid muta.endpoint '{}': {}", self.muta.endpoint, e)
        })?;

        if self.muta.service_name.is_empty() {
            return Err(anyhow::anyhow!("Configuration error: muta.service_name must not be empty"));
        }

        if self.relayer.initial_height == u64::MAX {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer.initial_height must be below {}",
                u64::MAX
            ));
        }

        if self.muta.receipt_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: muta.receipt_poll_interval_ms must be greater than zero"
            ));
        }

        if self.relayer.idle_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer.idle_interval_ms must be greater than zero"
            ));
        }

        if self.relayer.header_flush_threshold == Some(0) {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer.header_flush_threshold must be at least 1 when set"
            ));
        }

        let retry = &self.relayer.retry;
        if retry.initial_backoff_ms == 0 || retry.multiplier == 0 {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer.retry needs a non-zero initial_backoff_ms and multiplier"
            ));
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(anyhow::anyhow!(
                "Configuration error: relayer.retry.max_backoff_ms ({}) is below initial_backoff_ms ({})",
                retry.max_backoff_ms,
                retry.initial_backoff_ms
            ));
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/ckb-relayer.toml (or CKB_RELAYER_CONFIG_PATH) exists
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("CKB_RELAYER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/ckb-relayer.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/ckb-relayer.template.toml config/ckb-relayer.toml\n\
                Then edit config/ckb-relayer.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// Suitable for local development against a dev chain. The lock script is
    /// a placeholder and must be replaced with the deployed deposit lock.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            ckb: CkbConfig {
                rpc_url: "http://127.0.0.1:8114".to_string(),
                target_lock: Script {
                    code_hash: Byte32([0u8; 32]),
                    hash_type: ScriptHashType::Data,
                    args: JsonBytes(vec![]),
                },
            },
            muta: MutaConfig {
                endpoint: "http://127.0.0.1:8000/graphql".to_string(),
                chain_id: Byte32([0u8; 32]),
                service_name: default_service_name(),
                cycles_limit: default_cycles_limit(),
                cycles_price: default_cycles_price(),
                timeout_gap: default_timeout_gap(),
                receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            },
            relayer: RelayerConfig {
                private_key_env: default_private_key_env(),
                state_dir: "data".to_string(),
                initial_height: 0,
                idle_interval_ms: default_idle_interval_ms(),
                block_interval_ms: default_block_interval_ms(),
                header_flush_threshold: None,
                retry: RetryConfig::default(),
            },
        }
    }
}
