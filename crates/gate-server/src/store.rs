//! Persistence collaborator: ticket ledger, sealed secret vault, and audit trail.
//!
//! The traits expose exactly what the protocol needs from a document store: point reads,
//! insert-if-absent, a conditional state update, and append-only writes. `LocalStore` is
//! the in-process binding; each table sits behind its own lock and, when a data directory
//! is configured, its journal is written under that same lock, so the compare-and-set and
//! its durable record are one step.
use async_trait::async_trait;
use gatepass_sdk::types::{AdmissionAttempt, Ticket, TicketState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::journal::Journal;
use crate::seal::SealedSecret;

const TICKETS_FILE: &str = "tickets.jsonl";
const SECRETS_FILE: &str = "secrets.jsonl";
const ATTEMPTS_FILE: &str = "attempts.jsonl";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "to", rename_all = "snake_case")]
pub enum StateUpdate {
    Used { at: u64, by: String },
    Void { at: u64, by: String },
}

impl StateUpdate {
    pub fn target(&self) -> TicketState {
        match self {
            StateUpdate::Used { .. } => TicketState::Used,
            StateUpdate::Void { .. } => TicketState::Void,
        }
    }

    fn apply(&self, ticket: &mut Ticket) {
        match self {
            StateUpdate::Used { at, by } => {
                ticket.state = TicketState::Used;
                ticket.admitted_at = Some(*at);
                ticket.admitted_by = Some(by.clone());
            }
            StateUpdate::Void { at, by } => {
                ticket.state = TicketState::Void;
                ticket.voided_at = Some(*at);
                ticket.voided_by = Some(by.clone());
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasResult {
    /// The row was in the expected state and now holds the update.
    Applied(Ticket),
    /// Someone else got there first; this is the row as it stands.
    Conflict(Ticket),
}

#[async_trait]
pub trait TicketLedger: Send + Sync {
    /// Fails with `Conflict` if the id is taken.
    async fn insert_ticket(&self, ticket: Ticket) -> Result<()>;

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>>;

    /// Atomically move `ticket_id` from `expected` to `update.target()`.
    async fn compare_and_set(
        &self,
        ticket_id: Uuid,
        expected: TicketState,
        update: StateUpdate,
    ) -> Result<CasResult>;

    async fn append_attempt(&self, attempt: AdmissionAttempt) -> Result<()>;

    async fn attempts_for(&self, ticket_id: &str) -> Result<Vec<AdmissionAttempt>>;
}

#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Fails with `Conflict` if the ticket already has a secret.
    async fn insert_sealed(&self, ticket_id: Uuid, sealed: SealedSecret) -> Result<()>;

    async fn get_sealed(&self, ticket_id: Uuid) -> Result<Option<SealedSecret>>;
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LedgerRecord {
    Issued { ticket: Ticket },
    Transition { ticket_id: Uuid, update: StateUpdate },
}

#[derive(Serialize, Deserialize)]
struct VaultRecord {
    ticket_id: Uuid,
    sealed: SealedSecret,
}

#[derive(Default)]
struct TicketTable {
    rows: HashMap<Uuid, Ticket>,
    journal: Option<Journal>,
}

#[derive(Default)]
struct SecretTable {
    rows: HashMap<Uuid, SealedSecret>,
    journal: Option<Journal>,
}

#[derive(Default)]
struct AttemptTable {
    by_ticket: HashMap<String, Vec<AdmissionAttempt>>,
    total: usize,
    journal: Option<Journal>,
}

pub struct LocalStore {
    tickets: RwLock<TicketTable>,
    secrets: RwLock<SecretTable>,
    attempts: Mutex<AttemptTable>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            tickets: RwLock::new(TicketTable::default()),
            secrets: RwLock::new(SecretTable::default()),
            attempts: Mutex::new(AttemptTable::default()),
        }
    }

    /// Open (or create) a durable store in `dir`, replaying its journals.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            GateError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let (journal, records) = Journal::open::<LedgerRecord>(&dir.join(TICKETS_FILE))?;
        let mut tickets = TicketTable {
            rows: HashMap::new(),
            journal: Some(journal),
        };
        for record in records {
            replay_ledger_record(&mut tickets.rows, record)?;
        }

        let (journal, records) = Journal::open::<VaultRecord>(&dir.join(SECRETS_FILE))?;
        let mut secrets = SecretTable {
            rows: HashMap::new(),
            journal: Some(journal),
        };
        for record in records {
            if secrets.rows.insert(record.ticket_id, record.sealed).is_some() {
                return Err(GateError::Storage(format!(
                    "Secret journal provisions {} twice",
                    record.ticket_id
                )));
            }
        }

        let (journal, records) = Journal::open::<AdmissionAttempt>(&dir.join(ATTEMPTS_FILE))?;
        let mut attempts = AttemptTable {
            journal: Some(journal),
            ..AttemptTable::default()
        };
        for attempt in records {
            attempts.total += 1;
            attempts
                .by_ticket
                .entry(attempt.ticket_id.clone())
                .or_default()
                .push(attempt);
        }

        info!(
            "Opened ledger at {}: {} tickets, {} secrets, {} attempts",
            dir.display(),
            tickets.rows.len(),
            secrets.rows.len(),
            attempts.total
        );

        Ok(Self {
            tickets: RwLock::new(tickets),
            secrets: RwLock::new(secrets),
            attempts: Mutex::new(attempts),
        })
    }

    pub async fn ticket_count(&self) -> usize {
        self.tickets.read().await.rows.len()
    }

    pub async fn attempt_count(&self) -> usize {
        self.attempts.lock().await.total
    }
}

fn replay_ledger_record(rows: &mut HashMap<Uuid, Ticket>, record: LedgerRecord) -> Result<()> {
    match record {
        LedgerRecord::Issued { ticket } => {
            let id = ticket.ticket_id;
            if rows.insert(id, ticket).is_some() {
                return Err(GateError::Storage(format!(
                    "Ledger journal issues {} twice",
                    id
                )));
            }
        }
        LedgerRecord::Transition { ticket_id, update } => {
            let ticket = rows.get_mut(&ticket_id).ok_or_else(|| {
                GateError::Storage(format!("Ledger journal moves unknown ticket {}", ticket_id))
            })?;
            if !ticket.state.can_transition_to(update.target()) {
                return Err(GateError::Storage(format!(
                    "Ledger journal has illegal transition {:?} -> {:?} for {}",
                    ticket.state,
                    update.target(),
                    ticket_id
                )));
            }
            update.apply(ticket);
        }
    }
    Ok(())
}

#[async_trait]
impl TicketLedger for LocalStore {
    async fn insert_ticket(&self, ticket: Ticket) -> Result<()> {
        let mut table = self.tickets.write().await;
        if table.rows.contains_key(&ticket.ticket_id) {
            return Err(GateError::Conflict(format!(
                "Ticket {} already exists",
                ticket.ticket_id
            )));
        }
        if let Some(journal) = table.journal.as_mut() {
            journal.append(&LedgerRecord::Issued {
                ticket: ticket.clone(),
            })?;
        }
        table.rows.insert(ticket.ticket_id, ticket);
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.tickets.read().await.rows.get(&ticket_id).cloned())
    }

    async fn compare_and_set(
        &self,
        ticket_id: Uuid,
        expected: TicketState,
        update: StateUpdate,
    ) -> Result<CasResult> {
        let mut table = self.tickets.write().await;
        let current = table
            .rows
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| GateError::NotFound(ticket_id.to_string()))?;

        if current.state != expected || !current.state.can_transition_to(update.target()) {
            return Ok(CasResult::Conflict(current));
        }

        // Durable first: a failed write leaves the row untouched.
        if let Some(journal) = table.journal.as_mut() {
            journal.append(&LedgerRecord::Transition {
                ticket_id,
                update: update.clone(),
            })?;
        }

        let mut next = current;
        update.apply(&mut next);
        table.rows.insert(ticket_id, next.clone());
        Ok(CasResult::Applied(next))
    }

    async fn append_attempt(&self, attempt: AdmissionAttempt) -> Result<()> {
        let mut table = self.attempts.lock().await;
        if let Some(journal) = table.journal.as_mut() {
            journal.append(&attempt)?;
        }
        table.total += 1;
        table
            .by_ticket
            .entry(attempt.ticket_id.clone())
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn attempts_for(&self, ticket_id: &str) -> Result<Vec<AdmissionAttempt>> {
        Ok(self
            .attempts
            .lock()
            .await
            .by_ticket
            .get(ticket_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SecretVault for LocalStore {
    async fn insert_sealed(&self, ticket_id: Uuid, sealed: SealedSecret) -> Result<()> {
        let mut table = self.secrets.write().await;
        if table.rows.contains_key(&ticket_id) {
            return Err(GateError::Conflict(format!(
                "Ticket {} already has a secret",
                ticket_id
            )));
        }
        if let Some(journal) = table.journal.as_mut() {
            journal.append(&VaultRecord {
                ticket_id,
                sealed: sealed.clone(),
            })?;
        }
        table.rows.insert(ticket_id, sealed);
        Ok(())
    }

    async fn get_sealed(&self, ticket_id: Uuid) -> Result<Option<SealedSecret>> {
        Ok(self.secrets.read().await.rows.get(&ticket_id).cloned())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gatepass_sdk::types::{ScanOutcome, Tier};
    use std::sync::Arc;

    pub(crate) fn sample_ticket() -> Ticket {
        Ticket {
            ticket_id: Uuid::new_v4(),
            event_id: "evt-emf-2025".into(),
            tier: Tier::Premium,
            owner_id: "alice".into(),
            holder_name: "Alice".into(),
            state: TicketState::Valid,
            issued_at: 1_000,
            admitted_at: None,
            admitted_by: None,
            voided_at: None,
            voided_by: None,
        }
    }

    fn admit(by: &str) -> StateUpdate {
        StateUpdate::Used {
            at: 2_000,
            by: by.into(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_exclusive() {
        let store = LocalStore::in_memory();
        let ticket = sample_ticket();
        store.insert_ticket(ticket.clone()).await.unwrap();
        assert!(matches!(
            store.insert_ticket(ticket).await,
            Err(GateError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_cas_applies_once() {
        let store = LocalStore::in_memory();
        let ticket = sample_ticket();
        let id = ticket.ticket_id;
        store.insert_ticket(ticket).await.unwrap();

        let first = store
            .compare_and_set(id, TicketState::Valid, admit("gate-1"))
            .await
            .unwrap();
        let CasResult::Applied(row) = first else {
            panic!("first CAS should apply");
        };
        assert_eq!(row.state, TicketState::Used);
        assert_eq!(row.admitted_by.as_deref(), Some("gate-1"));

        let second = store
            .compare_and_set(id, TicketState::Valid, admit("gate-2"))
            .await
            .unwrap();
        let CasResult::Conflict(row) = second else {
            panic!("second CAS must conflict");
        };
        // the first admission is untouched
        assert_eq!(row.admitted_by.as_deref(), Some("gate-1"));
    }

    #[tokio::test]
    async fn test_cas_refuses_illegal_transitions() {
        let store = LocalStore::in_memory();
        let ticket = sample_ticket();
        let id = ticket.ticket_id;
        store.insert_ticket(ticket).await.unwrap();
        store
            .compare_and_set(id, TicketState::Valid, admit("gate-1"))
            .await
            .unwrap();

        // used -> void is not a legal move even when the caller expects `used`
        let result = store
            .compare_and_set(
                id,
                TicketState::Used,
                StateUpdate::Void {
                    at: 3_000,
                    by: "admin".into(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(result, CasResult::Conflict(_)));
    }

    #[tokio::test]
    async fn test_cas_unknown_ticket() {
        let store = LocalStore::in_memory();
        let result = store
            .compare_and_set(Uuid::new_v4(), TicketState::Valid, admit("gate-1"))
            .await;
        assert!(matches!(result, Err(GateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = Arc::new(LocalStore::in_memory());
        let ticket = sample_ticket();
        let id = ticket.ticket_id;
        store.insert_ticket(ticket).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set(id, TicketState::Valid, admit(&format!("gate-{}", i)))
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasResult::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn test_durable_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ticket = sample_ticket();
        let id = ticket.ticket_id;
        let sealed = SealedSecret {
            nonce: "00".repeat(12),
            ciphertext: "ab".repeat(48),
        };

        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.insert_ticket(ticket).await.unwrap();
            store.insert_sealed(id, sealed.clone()).await.unwrap();
            store
                .compare_and_set(id, TicketState::Valid, admit("gate-1"))
                .await
                .unwrap();
            store
                .append_attempt(AdmissionAttempt {
                    ticket_id: id.to_string(),
                    presented_proof: "abcd".into(),
                    window_index: 66,
                    outcome: ScanOutcome::Admit,
                    scanner_id: "gate-1".into(),
                    timestamp: 2_000,
                })
                .await
                .unwrap();
        }

        let store = LocalStore::open(dir.path()).unwrap();
        let row = store.get_ticket(id).await.unwrap().unwrap();
        assert_eq!(row.state, TicketState::Used);
        assert_eq!(row.admitted_at, Some(2_000));
        assert_eq!(store.get_sealed(id).await.unwrap(), Some(sealed));
        assert_eq!(store.attempts_for(&id.to_string()).await.unwrap().len(), 1);

        // replayed state still enforces at-most-once
        let again = store
            .compare_and_set(id, TicketState::Valid, admit("gate-2"))
            .await
            .unwrap();
        assert!(matches!(again, CasResult::Conflict(_)));
    }

    #[tokio::test]
    async fn test_secret_insert_is_exclusive() {
        let store = LocalStore::in_memory();
        let id = Uuid::new_v4();
        let sealed = SealedSecret {
            nonce: "00".repeat(12),
            ciphertext: "cd".repeat(48),
        };
        store.insert_sealed(id, sealed.clone()).await.unwrap();
        assert!(matches!(
            store.insert_sealed(id, sealed).await,
            Err(GateError::Conflict(_))
        ));
    }
}
