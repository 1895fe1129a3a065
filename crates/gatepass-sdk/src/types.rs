//! Wire types shared by the gate server, devices and the CLI.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::TicketSecret;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    General,
    Premium,
    Vip,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::General => "General Admission",
            Tier::Premium => "Premium",
            Tier::Vip => "VIP",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(Tier::General),
            "premium" => Ok(Tier::Premium),
            "vip" => Ok(Tier::Vip),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Valid,
    Used,
    Void,
}

impl TicketState {
    /// `valid -> used` and `valid -> void` only. Nothing leaves `used` or `void`.
    pub fn can_transition_to(&self, next: TicketState) -> bool {
        matches!(
            (self, next),
            (TicketState::Valid, TicketState::Used) | (TicketState::Valid, TicketState::Void)
        )
    }
}

/// A ticket row. The secret lives elsewhere and is never part of this type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: Uuid,
    pub event_id: String,
    pub tier: Tier,
    pub owner_id: String,
    pub holder_name: String,
    pub state: TicketState,
    pub issued_at: u64,
    pub admitted_at: Option<u64>,
    pub admitted_by: Option<String>,
    pub voided_at: Option<u64>,
    pub voided_by: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Admit,
    AlreadyUsed,
    Void,
    InvalidProof,
    NotFound,
}

impl ScanOutcome {
    pub fn is_admit(&self) -> bool {
        matches!(self, ScanOutcome::Admit)
    }

    /// What the gate screen shows in large letters.
    pub fn banner(&self) -> &'static str {
        match self {
            ScanOutcome::Admit => "ADMIT",
            ScanOutcome::AlreadyUsed => "ALREADY-USED",
            ScanOutcome::Void => "VOID",
            ScanOutcome::InvalidProof => "INVALID",
            ScanOutcome::NotFound => "NOT FOUND",
        }
    }
}

/// Audit record. One per decision, never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionAttempt {
    /// As presented; may not be a known ticket or even a UUID.
    pub ticket_id: String,
    pub presented_proof: String,
    /// The verifier's window at decision time.
    pub window_index: u64,
    pub outcome: ScanOutcome,
    pub scanner_id: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub ticket_id: String,
    pub proof: String,
    pub scanner_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub outcome: ScanOutcome,
    pub ticket_id: String,
    pub tier: Option<Tier>,
    pub holder_display_name: Option<String>,
    pub admitted_at: Option<u64>,
    pub admitted_by: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueRequest {
    pub event_id: String,
    pub tier: Tier,
    pub owner_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueResponse {
    pub tickets: Vec<Ticket>,
}

/// Holder-only provisioning answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplaySecret {
    pub ticket_id: Uuid,
    pub secret: TicketSecret,
    pub window_secs: u64,
    pub proof_bytes: usize,
    pub server_time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub window_secs: u64,
    pub proof_bytes: usize,
    pub server_time: u64,
    pub accepted_skew_windows: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttemptsResponse {
    pub attempts: Vec<AdmissionAttempt>,
}

/// `14:03:02 UTC` style for gate screens.
pub fn format_time_of_day(unix_secs: u64) -> String {
    match DateTime::<Utc>::from_timestamp(unix_secs as i64, 0) {
        Some(dt) => dt.format("%H:%M:%S UTC").to_string(),
        None => format!("t={}", unix_secs),
    }
}
