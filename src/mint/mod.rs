//! Batch Mint Module
//!
//! Turns detected deposit transactions into mint instructions for the Muta
//! `ckb_handler` service:
//! - asset id: the deposit transaction's hash
//! - receiver: the witness at index `inputs.len()`
//! - amount: `outputs_data[0]` read as a little-endian unsigned integer, taken
//!   from its first 16 bytes like an sUDT amount

pub mod codec;

use serde::{Deserialize, Serialize};

use crate::ckb_client::{decode_hex, Byte32, Transaction};
use crate::error::{RelayError, RelayResult};

/// Width of an sUDT amount at the start of a cell's data.
pub const AMOUNT_LEN: usize = 16;

// ============================================================================
// MINT DATA STRUCTURES
// ============================================================================

/// One "credit `amount` of `asset_id` to `receiver`" instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInstruction {
    /// Hash of the depositing CKB transaction
    pub asset_id: Byte32,
    /// Muta address taken from the deposit witness
    #[serde(with = "hex_bytes")]
    pub receiver: Vec<u8>,
    /// Deposited amount
    pub amount: u128,
}

/// Mint instructions of one block, in block transaction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintBatch {
    pub batch: Vec<MintInstruction>,
}

impl MintBatch {
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MintInstruction> {
        self.batch.iter()
    }
}

impl MintInstruction {
    /// Builds the instruction for one deposit transaction.
    ///
    /// The receiver witness is passed through as-is, empty or not; judging it
    /// is the handler's job. Bytes after the 16-byte amount are extension
    /// data and ignored. Fails with [`RelayError::DataShape`] when the
    /// receiver witness or the amount data is missing.
    pub fn from_deposit(tx: &Transaction) -> RelayResult<Self> {
        let receiver_index = tx.inputs.len();
        let receiver = tx.witnesses.get(receiver_index).ok_or_else(|| {
            RelayError::DataShape(format!(
                "deposit {} has {} witnesses, receiver expected at index {}",
                tx.hash,
                tx.witnesses.len(),
                receiver_index
            ))
        })?;

        let amount_data = tx.outputs_data.first().ok_or_else(|| {
            RelayError::DataShape(format!("deposit {} has no output data", tx.hash))
        })?;
        let amount_bytes = amount_data.as_bytes();
        let amount = le_bytes_to_u128(&amount_bytes[..amount_bytes.len().min(AMOUNT_LEN)])
            .map_err(|e| RelayError::DataShape(format!("deposit {}: {}", tx.hash, e)))?;

        Ok(Self {
            asset_id: tx.hash,
            receiver: receiver.as_bytes().to_vec(),
            amount,
        })
    }
}

/// Builds the mint batch for a block's deposits, preserving their order.
pub fn build_batch(deposits: &[&Transaction]) -> RelayResult<MintBatch> {
    let batch = deposits
        .iter()
        .map(|tx| MintInstruction::from_deposit(tx))
        .collect::<RelayResult<Vec<_>>>()?;
    Ok(MintBatch { batch })
}

// ============================================================================
// LITTLE-ENDIAN AMOUNT DECODING
// ============================================================================

/// Reads bytes as a little-endian integer: byte `i` contributes
/// `byte * 256^i`. Empty input is zero.
pub fn le_bytes_to_u128(bytes: &[u8]) -> Result<u128, String> {
    let mut total: u128 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        let contribution = u32::try_from(i * 8)
            .ok()
            .and_then(|shift| 1u128.checked_shl(shift))
            .and_then(|weight| weight.checked_mul(u128::from(*byte)))
            .ok_or_else(|| format!("little-endian amount overflows 128 bits at byte {}", i))?;
        total = total
            .checked_add(contribution)
            .ok_or_else(|| "little-endian amount overflows 128 bits".to_string())?;
    }
    Ok(total)
}

/// Decodes a (optionally `0x`-prefixed) little-endian hex string.
///
/// `"0x64"` is 100 and `"0x0100"` is 1: the first byte is the least
/// significant. Not to be confused with big-endian hex parsing.
pub fn le_hex_to_u128(hex: &str) -> Result<u128, String> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.len() % 2 != 0 {
        return Err(format!("little-endian hex '{}' has an odd number of digits", hex));
    }
    le_bytes_to_u128(&decode_hex(digits)?)
}

mod hex_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        crate::ckb_client::decode_hex(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_hex_examples() {
        assert_eq!(le_hex_to_u128("0x64").unwrap(), 100);
        assert_eq!(le_hex_to_u128("0x0100").unwrap(), 1);
        assert_eq!(le_hex_to_u128("0x0001").unwrap(), 256);
        assert_eq!(le_hex_to_u128("e803").unwrap(), 1000);
        assert_eq!(le_hex_to_u128("0x").unwrap(), 0);
    }

    #[test]
    fn test_le_hex_matches_sudt_u128_layout() {
        let amount: u128 = 123_456_789_000_000_000_000;
        let hex = format!("0x{}", hex::encode(amount.to_le_bytes()));
        assert_eq!(le_hex_to_u128(&hex).unwrap(), amount);
        assert_eq!(le_hex_to_u128(&format!("0x{}", "ff".repeat(16))).unwrap(), u128::MAX);
    }

    #[test]
    fn test_le_hex_rejects_odd_length_and_overflow() {
        assert!(le_hex_to_u128("0x123").is_err());
        assert!(le_hex_to_u128("0xzz").is_err());
        // 17 bytes with a non-zero top byte cannot fit
        let too_big = format!("0x{}01", "00".repeat(16));
        assert!(le_hex_to_u128(&too_big).is_err());
        // trailing zero padding beyond 16 bytes is harmless
        let padded = format!("0x64{}", "00".repeat(31));
        assert_eq!(le_hex_to_u128(&padded).unwrap(), 100);
    }
}
