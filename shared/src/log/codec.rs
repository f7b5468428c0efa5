use courier_error::AppResult;
use courier_types::MessageEnvelope;

/// MessagePack with named fields, so envelopes stay readable across
/// field reordering
pub fn encode_envelope(envelope: &MessageEnvelope) -> AppResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

pub fn decode_envelope(payload: &[u8]) -> AppResult<MessageEnvelope> {
    Ok(rmp_serde::from_slice(payload)?)
}
