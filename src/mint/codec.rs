//! Mint Batch Wire Codec
//!
//! Canonical RLP encoding of a [`MintBatch`], the payload signed by the relayer
//! and decoded by the Muta `ckb_handler` service:
//!
//! ```text
//! rlp([ rlp([ rlp([asset_id, receiver, amount]), ... ]) ])
//! ```
//!
//! `asset_id` is the 32-byte transaction hash, `receiver` the raw witness
//! bytes and `amount` a 16-byte big-endian unsigned integer. The output is a
//! pure function of the batch contents.

use alloy_rlp::{length_of_length, BufMut, Decodable, Encodable, Header};

use super::{MintBatch, MintInstruction};
use crate::error::{RelayError, RelayResult};
use crate::ckb_client::Byte32;

/// Width of the big-endian amount field.
pub const AMOUNT_WIDTH: usize = 16;

impl MintInstruction {
    fn rlp_payload_length(&self) -> usize {
        self.asset_id.as_bytes()[..].length()
            + self.receiver[..].length()
            + self.amount.to_be_bytes()[..].length()
    }
}

impl Encodable for MintInstruction {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.rlp_payload_length(),
        }
        .encode(out);
        self.asset_id.as_bytes()[..].encode(out);
        self.receiver[..].encode(out);
        self.amount.to_be_bytes()[..].encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.rlp_payload_length();
        payload_length + length_of_length(payload_length)
    }
}

impl Decodable for MintInstruction {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let mut payload = take_list(buf)?;

        let asset_id = <[u8; 32]>::decode(&mut payload)?;
        let receiver = Header::decode_bytes(&mut payload, false)?.to_vec();
        let amount = <[u8; AMOUNT_WIDTH]>::decode(&mut payload)?;

        if !payload.is_empty() {
            return Err(alloy_rlp::Error::Custom("trailing data in mint instruction"));
        }

        Ok(Self {
            asset_id: Byte32(asset_id),
            receiver,
            amount: u128::from_be_bytes(amount),
        })
    }
}

/// Splits the next list item off `buf` and returns its payload.
fn take_list<'a>(buf: &mut &'a [u8]) -> alloy_rlp::Result<&'a [u8]> {
    let header = Header::decode(buf)?;
    if !header.list {
        return Err(alloy_rlp::Error::UnexpectedString);
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort);
    }
    let (payload, rest) = buf.split_at(header.payload_length);
    *buf = rest;
    Ok(payload)
}

/// Encodes a batch into the canonical wire payload.
pub fn encode_batch(batch: &MintBatch) -> Vec<u8> {
    let instructions_length: usize = batch.iter().map(Encodable::length).sum();
    let inner_length = instructions_length + length_of_length(instructions_length);

    let mut out = Vec::with_capacity(inner_length + length_of_length(inner_length));
    Header {
        list: true,
        payload_length: inner_length,
    }
    .encode(&mut out);
    Header {
        list: true,
        payload_length: instructions_length,
    }
    .encode(&mut out);
    for instruction in batch.iter() {
        instruction.encode(&mut out);
    }
    out
}

/// Decodes a wire payload produced by [`encode_batch`].
pub fn decode_batch(bytes: &[u8]) -> RelayResult<MintBatch> {
    let mut buf = bytes;
    decode_envelope(&mut buf)
        .and_then(|batch| {
            if buf.is_empty() {
                Ok(batch)
            } else {
                Err(alloy_rlp::Error::Custom("trailing data after mint batch"))
            }
        })
        .map_err(|e| RelayError::Encoding(format!("invalid mint batch payload: {}", e)))
}

fn decode_envelope(buf: &mut &[u8]) -> alloy_rlp::Result<MintBatch> {
    let mut outer = take_list(buf)?;
    let mut instructions = take_list(&mut outer)?;
    if !outer.is_empty() {
        return Err(alloy_rlp::Error::Custom("mint envelope must hold exactly one list"));
    }

    let mut batch = Vec::new();
    while !instructions.is_empty() {
        batch.push(MintInstruction::decode(&mut instructions)?);
    }
    Ok(MintBatch { batch })
}
