//! Gate verification.
//!
//! One scan, one decision, one audit record. The only mutation is the ledger's
//! compare-and-set from `valid` to `used`; whoever loses that race is told the ticket is
//! already used, which is what keeps a shared screenshot good for a single entry.
use gatepass_sdk::crypto::matches_any;
use gatepass_sdk::proof::{decode_presented, expected_proofs};
use gatepass_sdk::types::{
    format_time_of_day, AdmissionAttempt, ScanOutcome, ScanRequest, ScanResponse, Ticket,
    TicketState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock_guard::ClockGuard;
use crate::error::{GateError, Result};
use crate::secret_store::SecretStore;
use crate::store::{CasResult, StateUpdate, TicketLedger};

const MAX_SCANNER_ID_LEN: usize = 64;
/// Longer presentations are cut down before they reach the audit log.
const MAX_AUDITED_PROOF_LEN: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Admit { ticket: Ticket },
    AlreadyUsed { ticket: Ticket },
    Void { ticket: Ticket },
    InvalidProof,
    NotFound,
}

impl Decision {
    pub fn outcome(&self) -> ScanOutcome {
        match self {
            Decision::Admit { .. } => ScanOutcome::Admit,
            Decision::AlreadyUsed { .. } => ScanOutcome::AlreadyUsed,
            Decision::Void { .. } => ScanOutcome::Void,
            Decision::InvalidProof => ScanOutcome::InvalidProof,
            Decision::NotFound => ScanOutcome::NotFound,
        }
    }

    pub fn into_response(self, presented_ticket_id: &str) -> ScanResponse {
        let outcome = self.outcome();
        let mut response = ScanResponse {
            outcome,
            ticket_id: presented_ticket_id.to_string(),
            tier: None,
            holder_display_name: None,
            admitted_at: None,
            admitted_by: None,
            message: String::new(),
        };

        match self {
            Decision::Admit { ticket } => {
                response.message = format!(
                    "Admitted: {} ({})",
                    ticket.holder_name,
                    ticket.tier.label()
                );
                response.tier = Some(ticket.tier);
                response.holder_display_name = Some(ticket.holder_name);
                response.admitted_at = ticket.admitted_at;
                response.admitted_by = ticket.admitted_by;
            }
            Decision::AlreadyUsed { ticket } => {
                response.message = match (&ticket.admitted_by, ticket.admitted_at) {
                    (Some(by), Some(at)) => {
                        format!("Already used at {}, {}", by, format_time_of_day(at))
                    }
                    _ => "Already used".to_string(),
                };
                response.tier = Some(ticket.tier);
                response.admitted_at = ticket.admitted_at;
                response.admitted_by = ticket.admitted_by;
            }
            Decision::Void { ticket } => {
                response.message = "Ticket has been voided".to_string();
                response.tier = Some(ticket.tier);
            }
            Decision::InvalidProof => {
                response.message = "Invalid or expired code".to_string();
            }
            Decision::NotFound => {
                response.message = "Unknown ticket".to_string();
            }
        }
        response
    }
}

pub struct ProofVerifier {
    ledger: Arc<dyn TicketLedger>,
    secrets: Arc<SecretStore>,
    guard: Arc<ClockGuard>,
    timeout: Duration,
}

impl ProofVerifier {
    pub fn new(
        ledger: Arc<dyn TicketLedger>,
        secrets: Arc<SecretStore>,
        guard: Arc<ClockGuard>,
        timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            secrets,
            guard,
            timeout,
        }
    }

    /// Verify within the configured time bound. The verification runs as its own task, so
    /// a timeout abandons the wait, not the work: the compare-and-set and the audit record
    /// still land together.
    pub async fn verify_bounded(self: &Arc<Self>, request: ScanRequest) -> Result<Decision> {
        let verifier = Arc::clone(self);
        let ticket_id = request.ticket_id.clone();
        let task = tokio::spawn(async move { verifier.verify(&request).await });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!("Verification task for {} failed: {}", ticket_id, join_error);
                Err(GateError::VerificationUnavailable(
                    "verification task failed".into(),
                ))
            }
            Err(_) => {
                warn!(
                    "Verification for {} exceeded {:?}",
                    ticket_id, self.timeout
                );
                Err(GateError::VerificationUnavailable(format!(
                    "no decision within {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn verify(&self, request: &ScanRequest) -> Result<Decision> {
        validate_request(request)?;
        let scanner_id = request.scanner_id.trim();
        let ticket_id = Uuid::parse_str(request.ticket_id.trim()).ok();
        let audit_key = canonical_ticket_id(&request.ticket_id);

        let (now, window_index) = self.guard.observe();
        let decision = match ticket_id {
            Some(id) => self
                .decide(id, &request.proof, scanner_id, now, window_index)
                .await
                .map_err(|e| {
                    error!("Verification of {} failed without a decision: {}", id, e);
                    GateError::VerificationUnavailable(e.to_string())
                })?,
            None => Decision::NotFound,
        };

        self.ledger
            .append_attempt(AdmissionAttempt {
                ticket_id: audit_key.clone(),
                presented_proof: audited_proof(&request.proof),
                window_index,
                outcome: decision.outcome(),
                scanner_id: scanner_id.to_string(),
                timestamp: now,
            })
            .await
            .map_err(|e| {
                error!(
                    "Audit append failed for {} ({:?}): {}",
                    audit_key,
                    decision.outcome(),
                    e
                );
                GateError::VerificationUnavailable("audit trail unavailable".into())
            })?;

        info!(
            "Scan {} by {}: {}",
            audit_key,
            scanner_id,
            decision.outcome().banner()
        );
        Ok(decision)
    }

    async fn decide(
        &self,
        ticket_id: Uuid,
        proof: &str,
        scanner_id: &str,
        now: u64,
        window_index: u64,
    ) -> Result<Decision> {
        let Some(ticket) = self.ledger.get_ticket(ticket_id).await? else {
            return Ok(Decision::NotFound);
        };

        match ticket.state {
            TicketState::Used => return Ok(Decision::AlreadyUsed { ticket }),
            TicketState::Void => return Ok(Decision::Void { ticket }),
            TicketState::Valid => {}
        }

        let secret = self
            .secrets
            .fetch_for_verification(ticket_id)
            .await
            .map_err(|e| match e {
                GateError::NotFound(_) => {
                    GateError::Internal(format!("Ticket {} has no provisioned secret", ticket_id))
                }
                other => other,
            })?;

        let params = self.guard.params();
        let expected = expected_proofs(&secret, window_index, params)?;
        let presented = decode_presented(proof, params);
        if !matches_any(&presented, &expected) {
            debug!(
                "Proof for {} matched none of windows {:?}",
                ticket_id,
                self.guard.accepted_windows(window_index)
            );
            return Ok(Decision::InvalidProof);
        }

        let update = StateUpdate::Used {
            at: now,
            by: scanner_id.to_string(),
        };
        match self
            .ledger
            .compare_and_set(ticket_id, TicketState::Valid, update)
            .await?
        {
            CasResult::Applied(ticket) => Ok(Decision::Admit { ticket }),
            CasResult::Conflict(ticket) => match ticket.state {
                TicketState::Void => Ok(Decision::Void { ticket }),
                _ => Ok(Decision::AlreadyUsed { ticket }),
            },
        }
    }
}

/// Ticket ids in any form `Uuid` parses are filed under the hyphenated lowercase form;
/// anything else stays as presented.
pub fn canonical_ticket_id(raw: &str) -> String {
    Uuid::parse_str(raw.trim())
        .map(|id| id.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn validate_request(request: &ScanRequest) -> Result<()> {
    let scanner_id = request.scanner_id.trim();
    if scanner_id.is_empty() {
        return Err(GateError::InvalidRequest("scanner_id is required".into()));
    }
    if scanner_id.len() > MAX_SCANNER_ID_LEN {
        return Err(GateError::InvalidRequest(format!(
            "scanner_id longer than {} characters",
            MAX_SCANNER_ID_LEN
        )));
    }
    Ok(())
}

fn audited_proof(proof: &str) -> String {
    proof.chars().take(MAX_AUDITED_PROOF_LEN).collect()
}
