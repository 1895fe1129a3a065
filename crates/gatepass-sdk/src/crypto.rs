use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};

use crate::error::{Result, SdkError};

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_LEN: usize = 32;

/// Domain tag for proof derivation, versioned with the payload prefix.
pub const DOMAIN_PROOF: &[u8] = b"gatepass:proof:v1:";

/// Per-ticket symmetric secret. Debug output never shows the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TicketSecret([u8; SECRET_LEN]);

impl TicketSecret {
    /// 256 bits from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SECRET_LEN] = bytes.try_into().map_err(|_| {
            SdkError::Crypto(format!(
                "Ticket secret must be {} bytes, got {}",
                SECRET_LEN,
                bytes.len()
            ))
        })?;
        if bytes.iter().all(|&b| b == 0) {
            return Err(SdkError::Crypto("Ticket secret must be non-zero".into()));
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SdkError::Crypto(format!("Invalid secret encoding: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TicketSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TicketSecret(<redacted>)")
    }
}

impl Serialize for TicketSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TicketSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TicketSecret::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// HMAC-SHA256(secret, DOMAIN_PROOF || window_be64) truncated to `len` bytes.
pub fn derive_proof_bytes(secret: &TicketSecret, window_index: u64, len: usize) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| SdkError::Crypto(format!("HMAC init failed: {}", e)))?;
    mac.update(DOMAIN_PROOF);
    mac.update(&window_index.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(digest[..len.min(digest.len())].to_vec())
}

/// Constant-time membership test. Every candidate is compared; there is no early exit.
pub fn matches_any(presented: &[u8], candidates: &[Vec<u8>]) -> bool {
    let mut hit = Choice::from(0u8);
    for candidate in candidates {
        hit |= presented.ct_eq(candidate.as_slice());
    }
    bool::from(hit)
}
