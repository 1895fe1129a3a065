//! Per-ticket secrets. Two parties may read one: the ticket's owner, through an
//! authenticated display fetch, and the verifier. Nobody else.
use gatepass_sdk::TicketSecret;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::identity::Identity;
use crate::seal::Sealer;
use crate::store::{SecretVault, TicketLedger};

pub struct SecretStore {
    vault: Arc<dyn SecretVault>,
    ledger: Arc<dyn TicketLedger>,
    sealer: Arc<Sealer>,
}

impl SecretStore {
    pub fn new(
        vault: Arc<dyn SecretVault>,
        ledger: Arc<dyn TicketLedger>,
        sealer: Arc<Sealer>,
    ) -> Self {
        Self {
            vault,
            ledger,
            sealer,
        }
    }

    /// Generate and persist the secret for a freshly issued ticket. Called once.
    pub async fn provision(&self, ticket_id: Uuid) -> Result<TicketSecret> {
        let secret = TicketSecret::generate();
        let sealed = self.sealer.seal(ticket_id, &secret)?;
        self.vault.insert_sealed(ticket_id, sealed).await?;
        info!("Provisioned secret for ticket {}", ticket_id);
        Ok(secret)
    }

    /// Owner-only. Any other identity gets `Unauthorized` and no secret bytes.
    pub async fn fetch_for_display(
        &self,
        ticket_id: Uuid,
        requester: &Identity,
    ) -> Result<TicketSecret> {
        let ticket = self
            .ledger
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| GateError::NotFound(ticket_id.to_string()))?;

        if ticket.owner_id != requester.user_id {
            warn!(
                "Refused secret for ticket {} to {} (owner is {})",
                ticket_id, requester.user_id, ticket.owner_id
            );
            return Err(GateError::Unauthorized(format!(
                "{} does not own ticket {}",
                requester.user_id, ticket_id
            )));
        }

        self.unseal(ticket_id).await
    }

    /// Verifier path. Crate-private; no HTTP handler calls this.
    pub(crate) async fn fetch_for_verification(&self, ticket_id: Uuid) -> Result<TicketSecret> {
        self.unseal(ticket_id).await
    }

    async fn unseal(&self, ticket_id: Uuid) -> Result<TicketSecret> {
        let sealed = self
            .vault
            .get_sealed(ticket_id)
            .await?
            .ok_or_else(|| GateError::NotFound(ticket_id.to_string()))?;
        self.sealer.open(ticket_id, &sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::store::tests::sample_ticket;
    use crate::store::LocalStore;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.into(),
            display_name: user_id.into(),
            role: Role::Holder,
        }
    }

    async fn setup() -> (SecretStore, Uuid) {
        let store = Arc::new(LocalStore::in_memory());
        let ticket = sample_ticket();
        let id = ticket.ticket_id;
        store.insert_ticket(ticket).await.unwrap();
        let secrets = SecretStore::new(store.clone(), store, Arc::new(Sealer::generate()));
        (secrets, id)
    }

    #[tokio::test]
    async fn test_owner_gets_provisioned_secret() {
        let (secrets, id) = setup().await;
        let provisioned = secrets.provision(id).await.unwrap();
        let fetched = secrets
            .fetch_for_display(id, &identity("alice"))
            .await
            .unwrap();
        assert_eq!(fetched, provisioned);
        assert_eq!(secrets.fetch_for_verification(id).await.unwrap(), provisioned);
    }

    #[tokio::test]
    async fn test_other_identity_fails_closed() {
        let (secrets, id) = setup().await;
        secrets.provision(id).await.unwrap();
        let result = secrets.fetch_for_display(id, &identity("bob")).await;
        assert!(matches!(result, Err(GateError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_provision_once() {
        let (secrets, id) = setup().await;
        secrets.provision(id).await.unwrap();
        assert!(matches!(
            secrets.provision(id).await,
            Err(GateError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_ticket() {
        let (secrets, _) = setup().await;
        let unknown = Uuid::new_v4();
        assert!(matches!(
            secrets.fetch_for_display(unknown, &identity("alice")).await,
            Err(GateError::NotFound(_))
        ));
        assert!(matches!(
            secrets.fetch_for_verification(unknown).await,
            Err(GateError::NotFound(_))
        ));
    }
}
