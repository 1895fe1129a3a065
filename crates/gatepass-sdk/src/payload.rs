/// The string a holder's barcode encodes: `GP1.<ticket_id>.<proof_hex>`.
/// The window index is deliberately absent; the verifier works it out from its own clock.
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Result, SdkError};
use crate::types::ScanRequest;

pub const PAYLOAD_PREFIX: &str = "GP1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketPayload {
    pub ticket_id: Uuid,
    pub proof: String,
}

impl TicketPayload {
    pub fn new(ticket_id: Uuid, proof: impl Into<String>) -> Self {
        Self {
            ticket_id,
            proof: proof.into(),
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn into_scan_request(self, scanner_id: &str) -> ScanRequest {
        ScanRequest {
            ticket_id: self.ticket_id.to_string(),
            proof: self.proof,
            scanner_id: scanner_id.to_string(),
        }
    }
}

impl fmt::Display for TicketPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", PAYLOAD_PREFIX, self.ticket_id, self.proof)
    }
}

impl FromStr for TicketPayload {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [prefix, ticket_id, proof] = parts.as_slice() else {
            return Err(SdkError::InvalidPayload(format!(
                "expected 3 dot-separated parts, got {}",
                parts.len()
            )));
        };

        if *prefix != PAYLOAD_PREFIX {
            return Err(SdkError::InvalidPayload(format!(
                "unknown payload version '{}'",
                prefix
            )));
        }

        let ticket_id = Uuid::parse_str(ticket_id)
            .map_err(|e| SdkError::InvalidPayload(format!("bad ticket id: {}", e)))?;

        if proof.is_empty() || !proof.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SdkError::InvalidPayload("proof must be non-empty hex".into()));
        }

        Ok(Self {
            ticket_id,
            proof: proof.to_ascii_lowercase(),
        })
    }
}
