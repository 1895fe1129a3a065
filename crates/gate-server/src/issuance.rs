use gatepass_sdk::types::{IssueRequest, Ticket, TicketState};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock_guard::ClockGuard;
use crate::error::{GateError, Result};
use crate::identity::{Identity, IdentityProvider};
use crate::secret_store::SecretStore;
use crate::store::{CasResult, StateUpdate, TicketLedger};

const MAX_EVENT_ID_LEN: usize = 128;

/// Purchase-side bookkeeping: minting tickets with their secrets, and voiding them.
pub struct IssuanceService {
    ledger: Arc<dyn TicketLedger>,
    secrets: Arc<SecretStore>,
    identities: Arc<dyn IdentityProvider>,
    guard: Arc<ClockGuard>,
    max_per_order: u32,
}

impl IssuanceService {
    pub fn new(
        ledger: Arc<dyn TicketLedger>,
        secrets: Arc<SecretStore>,
        identities: Arc<dyn IdentityProvider>,
        guard: Arc<ClockGuard>,
        max_per_order: u32,
    ) -> Self {
        Self {
            ledger,
            secrets,
            identities,
            guard,
            max_per_order,
        }
    }

    pub async fn issue(&self, request: IssueRequest, issuer: &Identity) -> Result<Vec<Ticket>> {
        issuer.require_admin()?;

        let event_id = request.event_id.trim();
        if event_id.is_empty() || event_id.len() > MAX_EVENT_ID_LEN {
            return Err(GateError::InvalidRequest(format!(
                "event_id must be 1..={} characters",
                MAX_EVENT_ID_LEN
            )));
        }
        if request.quantity == 0 || request.quantity > self.max_per_order {
            return Err(GateError::InvalidRequest(format!(
                "quantity must be between 1 and {}",
                self.max_per_order
            )));
        }

        let owner = self
            .identities
            .lookup(&request.owner_id)
            .await?
            .ok_or_else(|| {
                GateError::InvalidRequest(format!("Unknown owner {}", request.owner_id))
            })?;

        let issued_at = self.guard.now();
        let mut tickets = Vec::with_capacity(request.quantity as usize);
        for _ in 0..request.quantity {
            let ticket = Ticket {
                ticket_id: Uuid::new_v4(),
                event_id: event_id.to_string(),
                tier: request.tier,
                owner_id: owner.user_id.clone(),
                holder_name: owner.display_name.clone(),
                state: TicketState::Valid,
                issued_at,
                admitted_at: None,
                admitted_by: None,
                voided_at: None,
                voided_by: None,
            };
            self.ledger.insert_ticket(ticket.clone()).await?;
            if let Err(e) = self.secrets.provision(ticket.ticket_id).await {
                error!(
                    "Ticket {} issued without a secret, it cannot be admitted: {}",
                    ticket.ticket_id, e
                );
                return Err(e);
            }
            tickets.push(ticket);
        }

        info!(
            "{} issued {} {} ticket(s) for {} to {}",
            issuer.user_id,
            tickets.len(),
            request.tier.label(),
            event_id,
            owner.user_id
        );
        Ok(tickets)
    }

    /// Only a valid ticket can be voided; used and void are terminal.
    pub async fn void(&self, ticket_id: Uuid, admin: &Identity) -> Result<Ticket> {
        admin.require_admin()?;

        let update = StateUpdate::Void {
            at: self.guard.now(),
            by: admin.user_id.clone(),
        };
        match self
            .ledger
            .compare_and_set(ticket_id, TicketState::Valid, update)
            .await?
        {
            CasResult::Applied(ticket) => {
                info!("Ticket {} voided by {}", ticket_id, admin.user_id);
                Ok(ticket)
            }
            CasResult::Conflict(ticket) => {
                warn!(
                    "Refused to void ticket {} in state {:?}",
                    ticket_id, ticket.state
                );
                match ticket.state {
                    TicketState::Void => Err(GateError::Void),
                    _ => Err(GateError::AlreadyUsed),
                }
            }
        }
    }
}
