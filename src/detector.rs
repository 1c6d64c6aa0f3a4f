//! Cross-Transaction Detector
//!
//! Picks the deposit transactions out of a block. A deposit has exactly one
//! output and that output is locked by the configured target lock script.
//! The single-output rule is a hard filter: the mint builder reads
//! `outputs_data[0]` as the amount and relies on there being nothing else.

use crate::ckb_client::{Script, Transaction};

/// Matches block transactions against the deposit lock script.
#[derive(Debug, Clone)]
pub struct CrossTxDetector {
    target_lock: Script,
}

impl CrossTxDetector {
    pub fn new(target_lock: Script) -> Self {
        Self { target_lock }
    }

    pub fn target_lock(&self) -> &Script {
        &self.target_lock
    }

    /// Returns true if `tx` is a cross-chain deposit.
    pub fn is_cross_tx(&self, tx: &Transaction) -> bool {
        matches!(tx.outputs.as_slice(), [output] if output.lock == self.target_lock)
    }

    /// Returns the deposits of a block, in block order.
    pub fn detect<'a>(&self, transactions: &'a [Transaction]) -> Vec<&'a Transaction> {
        transactions.iter().filter(|tx| self.is_cross_tx(tx)).collect()
    }
}
