//! User consent decisions per (user, client, scope).
//!
//! Decisions expire. An expired entry is treated exactly like a missing one,
//! which forces the user to approve again.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::GrantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

impl FromStr for ApprovalDecision {
    type Err = GrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" | "approve" | "true" => Ok(ApprovalDecision::Approved),
            "denied" | "deny" | "false" => Ok(ApprovalDecision::Denied),
            other => Err(GrantError::InvalidRequest(format!(
                "decision must be approved or denied, got {:?}",
                other
            ))),
        }
    }
}

/// A recorded consent decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    pub decision: ApprovalDecision,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ApprovalKey {
    user_id: String,
    client_id: String,
    scope: String,
}

impl ApprovalKey {
    fn new(user_id: &str, client_id: &str, scope: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
        }
    }
}

/// In-memory approval store. Every operation is a single map operation,
/// so callers never hold a lock across I/O.
pub struct ApprovalStore {
    approvals: DashMap<ApprovalKey, Approval>,
    lifetime: chrono::Duration,
}

impl ApprovalStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            approvals: DashMap::new(),
            lifetime: chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Record (or overwrite) a decision, valid for the configured lifetime.
    pub fn record_approval(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        decision: ApprovalDecision,
    ) -> Approval {
        self.record_approval_at(user_id, client_id, scope, decision, Utc::now())
    }

    pub fn record_approval_at(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Approval {
        let approval = Approval {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            decision,
            expires_at: now.checked_add_signed(self.lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.approvals.insert(
            ApprovalKey::new(user_id, client_id, scope),
            approval.clone(),
        );
        tracing::debug!(
            "Recorded {:?} for user {} client {} scope {}",
            decision,
            user_id,
            client_id,
            scope
        );
        approval
    }

    pub fn is_approved(&self, user_id: &str, client_id: &str, scope: &str) -> bool {
        self.is_approved_at(user_id, client_id, scope, Utc::now())
    }

    /// True only for an unexpired `Approved` decision. Expired entries are evicted.
    pub fn is_approved_at(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let key = ApprovalKey::new(user_id, client_id, scope);
        // Copy out before touching the map again; a live `Ref` holds the shard lock.
        let state = self
            .approvals
            .get(&key)
            .map(|a| (a.decision, a.expires_at));

        match state {
            Some((decision, expires_at)) if expires_at > now => {
                decision == ApprovalDecision::Approved
            }
            Some(_) => {
                self.approvals.remove_if(&key, |_, a| a.expires_at <= now);
                false
            }
            None => false,
        }
    }

    /// Remove a decision. Returns whether one existed.
    pub fn revoke(&self, user_id: &str, client_id: &str, scope: &str) -> bool {
        self.approvals
            .remove(&ApprovalKey::new(user_id, client_id, scope))
            .is_some()
    }

    /// Unexpired decisions a user has made for a client.
    pub fn approvals_for(&self, user_id: &str, client_id: &str) -> Vec<Approval> {
        let now = Utc::now();
        let mut approvals: Vec<Approval> = self
            .approvals
            .iter()
            .filter(|entry| {
                let a = entry.value();
                a.user_id == user_id && a.client_id == client_id && a.expires_at > now
            })
            .map(|entry| entry.value().clone())
            .collect();
        approvals.sort_by(|a, b| a.scope.cmp(&b.scope));
        approvals
    }

    /// Drop every expired decision. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.approvals.len();
        self.approvals.retain(|_, a| a.expires_at > now);
        before.saturating_sub(self.approvals.len())
    }

    pub fn len(&self) -> usize {
        self.approvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty()
    }
}
