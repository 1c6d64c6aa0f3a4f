//! Cryptographic Operations Module
//!
//! This module handles all cryptographic operations for the relayer: loading
//! the secp256k1 relayer key, signing mint payloads for the Muta handler
//! service, signing Muta transaction hashes, and verifying signatures.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: The relayer key authorizes minting on Muta. Private keys must
//! never be exposed or logged.

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::config::RelayerConfig;
use crate::error::{RelayError, RelayResult};

// ============================================================================
// CRYPTOGRAPHIC DATA STRUCTURES
// ============================================================================

/// Length of a recoverable signature: `r || s || v`.
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

/// An encoded mint batch together with the relayer's signature over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    /// Encoded mint batch
    pub payload: Vec<u8>,
    /// Recoverable signature over `keccak256(payload)` (65 bytes, v = 0 or 1)
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn payload_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.payload))
    }

    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ============================================================================
// CRYPTOGRAPHIC SERVICE IMPLEMENTATION
// ============================================================================

/// Holds the relayer signing key. Constructed once at startup and passed
/// to whatever needs to sign.
pub struct CryptoService {
    signing_key: SigningKey,
}

impl CryptoService {
    /// Creates the crypto service from the key named in the relayer config.
    ///
    /// # Returns
    ///
    /// * `Ok(CryptoService)` - Key loaded
    /// * `Err(RelayError::Signing)` - Variable unset or key malformed
    pub fn new(config: &RelayerConfig) -> RelayResult<Self> {
        let private_key_hex = config
            .get_private_key()
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        let service = Self::from_private_key_hex(&private_key_hex)?;

        info!(
            "Crypto service initialized, relayer address {}",
            service.muta_address_hex()
        );

        Ok(service)
    }

    /// Creates the crypto service from a 32-byte hex private key (`0x` optional).
    pub fn from_private_key_hex(private_key_hex: &str) -> RelayResult<Self> {
        let trimmed = private_key_hex.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits)
            .map_err(|e| RelayError::Signing(format!("Invalid private key hex: {}", e)))?;

        if bytes.len() != 32 {
            return Err(RelayError::Signing(format!(
                "Invalid private key length: expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| RelayError::Signing(format!("Invalid secp256k1 private key: {}", e)))?;

        Ok(Self { signing_key })
    }

    /// Signs an encoded mint batch.
    ///
    /// The signature covers `keccak256(payload)` and is 65 bytes: `r || s || v`
    /// where `v` is the recovery id (0 or 1).
    pub fn sign_payload(&self, payload: Vec<u8>) -> RelayResult<SignedMessage> {
        let digest = keccak256(&payload);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| RelayError::Signing(format!("Failed to sign payload digest: {}", e)))?;

        let mut bytes = Vec::with_capacity(RECOVERABLE_SIGNATURE_LEN);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery_id.to_byte());

        Ok(SignedMessage {
            payload,
            signature: bytes,
        })
    }

    /// Signs a precomputed 32-byte digest, returning the 64-byte compact
    /// signature Muta expects on transactions.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> RelayResult<[u8; 64]> {
        let (signature, _) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| RelayError::Signing(format!("Failed to sign digest: {}", e)))?;
        let mut compact = [0u8; 64];
        compact.copy_from_slice(&signature.to_bytes());
        Ok(compact)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// SEC1 compressed public key (33 bytes).
    pub fn public_key_compressed(&self) -> Vec<u8> {
        self.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    /// Muta address: last 20 bytes of keccak256 over the compressed public key.
    pub fn muta_address(&self) -> [u8; 20] {
        let hash = keccak256(&self.public_key_compressed());
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        address
    }

    pub fn muta_address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.muta_address()))
    }
}

/// Checks a [`SignedMessage`] against a public key.
///
/// Both the ECDSA verification and the public key recovered through `v`
/// must agree with `key`.
pub fn verify_signed_message(message: &SignedMessage, key: &VerifyingKey) -> bool {
    if message.signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return false;
    }

    let Ok(signature) = Signature::from_slice(&message.signature[..64]) else {
        return false;
    };
    let Some(recovery_id) = RecoveryId::from_byte(message.signature[64]) else {
        return false;
    };

    let digest = keccak256(&message.payload);
    if key.verify_prehash(&digest, &signature).is_err() {
        return false;
    }

    matches!(
        VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id),
        Ok(recovered) if &recovered == key
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_rejects_short_and_zero_keys() {
        assert!(matches!(
            CryptoService::from_private_key_hex("0x1234"),
            Err(RelayError::Signing(_))
        ));
        assert!(matches!(
            CryptoService::from_private_key_hex(&format!("0x{}", "00".repeat(32))),
            Err(RelayError::Signing(_))
        ));
        assert!(matches!(
            CryptoService::from_private_key_hex("not hex"),
            Err(RelayError::Signing(_))
        ));
    }

    #[test]
    fn test_compressed_public_key_shape() {
        let crypto = CryptoService::from_private_key_hex(&format!("0x{}", "11".repeat(32))).unwrap();
        let public_key = crypto.public_key_compressed();
        assert_eq!(public_key.len(), 33);
        assert!(public_key[0] == 0x02 || public_key[0] == 0x03);
    }
}
