//! Identity collaborator boundary.
//!
//! The gate server never manages accounts. It asks an `IdentityProvider` who a bearer token
//! belongs to and what that identity may do. The shipped binding reads a static token file;
//! a managed auth service would implement the same trait.
use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GateError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ticket holder / attendee
    Holder,
    /// Organizer gate staff running a scanner
    Staff,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

impl Identity {
    pub fn can_scan(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_scanner(&self) -> Result<()> {
        if self.can_scan() {
            Ok(())
        } else {
            Err(GateError::Unauthorized(format!(
                "{} is not gate staff",
                self.user_id
            )))
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(GateError::Unauthorized(format!(
                "{} is not an admin",
                self.user_id
            )))
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token. Unknown tokens are `Unauthenticated`.
    async fn authenticate(&self, token: &str) -> Result<Identity>;

    /// Look up an identity by user id, e.g. a ticket owner at issuance.
    async fn lookup(&self, user_id: &str) -> Result<Option<Identity>>;
}

#[derive(Deserialize)]
struct TokenEntry {
    token: String,
    #[serde(flatten)]
    identity: Identity,
}

/// Token table loaded from a JSON array of `{token, user_id, display_name, role}`.
#[derive(Default)]
pub struct StaticIdentities {
    by_token: HashMap<String, Identity>,
    by_user: HashMap<String, Identity>,
}

impl StaticIdentities {
    pub fn new(entries: impl IntoIterator<Item = (String, Identity)>) -> Self {
        let mut table = Self::default();
        for (token, identity) in entries {
            table
                .by_user
                .insert(identity.user_id.clone(), identity.clone());
            table.by_token.insert(token, identity);
        }
        table
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GateError::Internal(format!(
                "Failed to read identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        let entries: Vec<TokenEntry> = serde_json::from_str(&raw).map_err(|e| {
            GateError::Internal(format!("Invalid identity file {}: {}", path.display(), e))
        })?;
        info!("Loaded {} identities from {}", entries.len(), path.display());
        Ok(Self::new(entries.into_iter().map(|e| (e.token, e.identity))))
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn authenticate(&self, token: &str) -> Result<Identity> {
        self.by_token
            .get(token)
            .cloned()
            .ok_or(GateError::Unauthenticated)
    }

    async fn lookup(&self, user_id: &str) -> Result<Option<Identity>> {
        Ok(self.by_user.get(user_id).cloned())
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GateError::Unauthenticated)
}
