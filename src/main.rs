//! CKB Relayer Service
//!
//! A relay service that watches CKB for deposits locked by the configured lock
//! script and mints the deposited assets on Muta.
//!
//! ## Overview
//!
//! The relayer:
//! 1. Follows CKB block by block from its persisted height cursor
//! 2. Builds a mint batch from each block's deposits
//! 3. Signs the batch and submits it to the Muta `ckb_handler` service
//! 4. Buffers CKB headers for the handler's header tracker
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds the relayer key that authorizes minting on
//! Muta. Ensure proper key management and access controls for production use.

use anyhow::Result;
use std::path::Path;
use tracing::info;

use ckb_relayer::config::Config;
use ckb_relayer::storage::{FileCursorStore, FileHeaderStore, CURSOR_FILE, HEADERS_FILE};
use ckb_relayer::{CkbClient, CkbRelay, CryptoService, ExponentialBackoff, MutaClient};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the relayer.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Opens the persisted relay state and connects both chain clients
/// 4. Runs the sync loop until the retry policy halts it
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging for debugging and monitoring
    tracing_subscriber::fmt::init();

    info!("Starting CKB Relayer Service");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    // Check for help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("CKB Relayer Service");
        println!();
        println!("Usage: ckb-relayer [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  CKB_RELAYER_CONFIG_PATH    Path to config file (overrides --config)");
        println!("  RELAYER_PRIVATE_KEY        Relayer secp256k1 key (name set by relayer.private_key_env)");
        return Ok(());
    }

    let mut config_path = None;

    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    if std::env::var("CKB_RELAYER_CONFIG_PATH").is_err() {
        if let Some(path) = config_path {
            std::env::set_var("CKB_RELAYER_CONFIG_PATH", &path);
            info!("Using custom config: {}", path);
        }
    }

    // Load configuration from config/ckb-relayer.toml (or CKB_RELAYER_CONFIG_PATH)
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let state_dir = Path::new(&config.relayer.state_dir);
    let cursor = FileCursorStore::open(state_dir.join(CURSOR_FILE)).await?;
    let headers = FileHeaderStore::open(state_dir.join(HEADERS_FILE)).await?;
    info!("Relay state opened from {}", state_dir.display());

    let ckb = CkbClient::new(&config.ckb.rpc_url)?;
    let muta = MutaClient::new(&config.muta, CryptoService::new(&config.relayer)?)?;
    let signer = CryptoService::new(&config.relayer)?;
    let policy = ExponentialBackoff::from_config(&config.relayer.retry);

    let mut relay = CkbRelay::new(&config, ckb, muta, signer, cursor, headers, policy);

    info!("CKB relay initialized successfully");

    // Run the relay (this blocks until the retry policy halts it)
    relay.run().await?;
    Ok(())
}
