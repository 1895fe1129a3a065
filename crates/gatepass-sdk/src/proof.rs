//! Rotating proof generation.
//!
//! `proof = truncate(HMAC-SHA256(secret, window), proof_bytes)` rendered as lowercase hex.
//! Deterministic for a `(secret, window)` pair, unpredictable without the secret, and
//! useless once the verifier's clock has moved two windows past it.
use crate::crypto::{derive_proof_bytes, TicketSecret};
use crate::error::Result;
use crate::window::ProofParams;

pub fn proof_for_window(secret: &TicketSecret, window_index: u64, params: &ProofParams) -> Result<String> {
    params.validate()?;
    Ok(hex::encode(derive_proof_bytes(
        secret,
        window_index,
        params.proof_bytes,
    )?))
}

/// The proof a holder device shows at `unix_secs`.
pub fn current_proof(secret: &TicketSecret, unix_secs: u64, params: &ProofParams) -> Result<String> {
    proof_for_window(secret, params.window_index(unix_secs), params)
}

/// Raw proofs for every window the verifier accepts around `current_window`.
pub fn expected_proofs(
    secret: &TicketSecret,
    current_window: u64,
    params: &ProofParams,
) -> Result<Vec<Vec<u8>>> {
    params.validate()?;
    params
        .accepted_windows(current_window)
        .into_iter()
        .map(|w| derive_proof_bytes(secret, w, params.proof_bytes))
        .collect()
}

/// Decode a presented proof for comparison. Malformed input becomes all-zero bytes of the
/// expected length so the comparison path is the same for junk and for wrong codes.
pub fn decode_presented(presented: &str, params: &ProofParams) -> Vec<u8> {
    match hex::decode(presented.trim()) {
        Ok(bytes) if bytes.len() == params.proof_bytes => bytes,
        _ => vec![0u8; params.proof_bytes],
    }
}
