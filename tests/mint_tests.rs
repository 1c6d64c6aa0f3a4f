//! Tests for deposit detection, mint batch building and the wire codec
//!
//! These tests run the detector, builder and encoder together on realistic
//! CKB transactions, the way the sync loop does for one block.

mod helpers;

use ckb_relayer::ckb_client::{Byte32, JsonBytes};
use ckb_relayer::detector::CrossTxDetector;
use ckb_relayer::error::RelayError;
use ckb_relayer::mint::codec::{decode_batch, encode_batch};
use ckb_relayer::mint::{build_batch, le_hex_to_u128, MintInstruction};
use helpers::{
    create_deposit_tx, create_plain_tx, deposit_lock, other_lock, DUMMY_DEPOSIT_HASH, DUMMY_RECEIVER,
};

fn receiver() -> Vec<u8> {
    hex::decode(DUMMY_RECEIVER.trim_start_matches("0x")).unwrap()
}

// ============================================================================
// DETECTION
// ============================================================================

/// 1. Test: Detector Ignores Deposit Lock In Multi Output Transactions
/// Verifies that a transaction paying the deposit lock plus change is not a deposit.
/// Why: The builder reads outputs_data[0] as the amount and needs a single output.
#[test]
fn test_detector_ignores_multi_output_transactions() {
    let detector = CrossTxDetector::new(deposit_lock());

    let mut with_change = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 10);
    let mut change = with_change.outputs[0].clone();
    change.lock = other_lock();
    with_change.outputs.push(change);
    with_change.outputs_data.push(JsonBytes(vec![]));

    let deposit = create_deposit_tx(Byte32([2; 32]), 1, &receiver(), 10);
    let txs = vec![with_change, create_plain_tx(Byte32([3; 32])), deposit];

    let found = detector.detect(&txs);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].hash, Byte32([2; 32]));
}

/// 2. Test: Detector Requires Exact Lock Args
/// Verifies that a lock with the same code hash but different args does not match.
/// Why: The lock script match is structural over all fields.
#[test]
fn test_detector_requires_exact_lock_args() {
    let detector = CrossTxDetector::new(deposit_lock());
    let mut tx = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 10);
    tx.outputs[0].lock.args = JsonBytes(vec![0xaa; 21]);

    assert!(!detector.is_cross_tx(&tx));
}

// ============================================================================
// BATCH BUILDING
// ============================================================================

/// 3. Test: Deposit Maps To Hash Receiver Amount
/// Verifies that a deposit with hash H, n inputs, witness[n] = R and LE amount A
/// yields exactly {H, R, A}.
/// Why: This mapping is what Muta mints from.
#[test]
fn test_deposit_maps_to_hash_receiver_amount() {
    let hash: Byte32 = DUMMY_DEPOSIT_HASH.parse().unwrap();
    let tx = create_deposit_tx(hash, 3, &receiver(), 1_000_000);

    let batch = build_batch(&[&tx]).unwrap();

    assert_eq!(
        batch.batch,
        vec![MintInstruction {
            asset_id: hash,
            receiver: receiver(),
            amount: 1_000_000,
        }]
    );
}

/// 4. Test: Amount Is Little Endian
/// Verifies that output data "0x0100" decodes to 1, not 256.
/// Why: sUDT amounts are stored little-endian.
#[test]
fn test_amount_is_little_endian() {
    let mut tx = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 0);
    tx.outputs_data[0] = "0x0100".parse().unwrap();
    assert_eq!(MintInstruction::from_deposit(&tx).unwrap().amount, 1);

    tx.outputs_data[0] = "0x64".parse().unwrap();
    assert_eq!(MintInstruction::from_deposit(&tx).unwrap().amount, 100);

    assert_eq!(le_hex_to_u128("0x0001").unwrap(), 256);
}

/// 5. Test: Missing Output Data Fails Loudly
/// Verifies that a deposit without outputs_data is a data shape violation.
/// Why: A zero amount must never be invented.
#[test]
fn test_missing_output_data_fails_loudly() {
    let mut tx = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 5);
    tx.outputs_data.clear();

    assert!(matches!(build_batch(&[&tx]), Err(RelayError::DataShape(_))));
}

/// 6. Test: One Bad Deposit Fails The Whole Batch
/// Verifies that the builder does not drop a malformed deposit and submit the rest.
/// Why: The block is retried as a unit.
#[test]
fn test_one_bad_deposit_fails_the_whole_batch() {
    let good = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 5);
    let mut bad = create_deposit_tx(Byte32([2; 32]), 1, &receiver(), 5);
    bad.witnesses.pop();

    assert!(matches!(build_batch(&[&good, &bad]), Err(RelayError::DataShape(_))));
}

// ============================================================================
// ENCODING
// ============================================================================

/// 7. Test: Encoding Is Deterministic Across Rebuilds
/// Verifies that rebuilding the batch from the same block yields identical bytes.
/// Why: A replayed height must submit the same payload.
#[test]
fn test_encoding_is_deterministic_across_rebuilds() {
    let txs = vec![
        create_deposit_tx(Byte32([1; 32]), 1, &[0x01; 20], u128::MAX),
        create_deposit_tx(Byte32([2; 32]), 4, &[0x02; 20], 0),
    ];
    let refs: Vec<_> = txs.iter().collect();

    let first = encode_batch(&build_batch(&refs).unwrap());
    let second = encode_batch(&build_batch(&refs).unwrap());

    assert_eq!(first, second);
}

/// 8. Test: Encoded Batch Decodes To Same Instructions
/// Verifies that decode_batch recovers a multi-instruction batch in order.
/// Why: Muta decodes the payload with the same layout.
#[test]
fn test_encoded_batch_decodes_to_same_instructions() {
    let txs = vec![
        create_deposit_tx(Byte32([9; 32]), 1, &[0x09; 20], 900),
        create_deposit_tx(Byte32([1; 32]), 2, &[0x01; 32], 1),
        create_deposit_tx(Byte32([5; 32]), 1, &[0x7f], 5),
    ];
    let refs: Vec<_> = txs.iter().collect();
    let batch = build_batch(&refs).unwrap();

    assert_eq!(decode_batch(&encode_batch(&batch)).unwrap(), batch);
}

/// 9. Test: Decode Rejects Malformed Payloads
/// Verifies that truncated input and a short asset id are encoding errors.
/// Why: Malformed payloads must surface as errors, not panics.
#[test]
fn test_decode_rejects_malformed_payloads() {
    let tx = create_deposit_tx(Byte32([1; 32]), 1, &receiver(), 5);
    let encoded = encode_batch(&build_batch(&[&tx]).unwrap());

    assert!(matches!(
        decode_batch(&encoded[..encoded.len() - 1]),
        Err(RelayError::Encoding(_))
    ));
    assert!(matches!(decode_batch(&[]), Err(RelayError::Encoding(_))));
    // [[ [0x01, 20-byte receiver, empty amount] ]]: well-formed RLP, one-byte asset id
    let short_asset_id = format!("d9d8d70194{}80", "00".repeat(20));
    assert!(matches!(
        decode_batch(&hex::decode(short_asset_id).unwrap()),
        Err(RelayError::Encoding(_))
    ));
}

// ============================================================================
// THIRD-PARTY DEPOSIT SHAPES
// ============================================================================

/// 10. Test: Empty Receiver Witness Is Passed Through
/// Verifies that an empty witness at index input-count yields an instruction
/// with an empty receiver instead of failing the block.
/// Why: Anyone can lock a cell with the deposit lock; a block must not stall on it.
#[test]
fn test_empty_receiver_witness_is_passed_through() {
    let tx = create_deposit_tx(Byte32([3; 32]), 1, &[], 9);

    let batch = build_batch(&[&tx]).unwrap();

    assert_eq!(batch.batch[0].receiver, Vec::<u8>::new());
    assert_eq!(batch.batch[0].amount, 9);
}

/// 11. Test: Data After The Amount Is Ignored
/// Verifies that only the first 16 bytes of outputs_data[0] form the amount,
/// even when the bytes after them are non-zero.
/// Why: sUDT cells may carry extension data after the amount.
#[test]
fn test_data_after_amount_is_ignored() {
    let mut tx = create_deposit_tx(Byte32([4; 32]), 1, &receiver(), 0);
    let mut data = 500u128.to_le_bytes().to_vec();
    data.extend_from_slice(&[0xff; 16]);
    tx.outputs_data[0] = JsonBytes(data);

    assert_eq!(MintInstruction::from_deposit(&tx).unwrap().amount, 500);
}
