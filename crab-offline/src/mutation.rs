//! Queued write intents
//!
//! Every user action that must reach the backend becomes a [`Mutation`]
//! persisted as a [`PendingMutation`] in the local store. Mutations refer to
//! rows through [`EntityRef`], so a mutation can target a row that only
//! exists under a temporary id until an earlier create succeeds.

use serde::{Deserialize, Serialize};
use shared::models::OrderItem;
use shared::{EntityKind, EntityRef};

/// A write intent, one variant per backend endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    /// `POST /sessions`
    CreateSession {
        temp_id: String,
        table_id: Option<String>,
        guest_count: i32,
    },
    /// `POST /orders`
    CreateOrder {
        temp_id: String,
        session: EntityRef,
        items: Vec<OrderItem>,
    },
    /// `PATCH /orders/{id}/confirm`
    ConfirmOrder { order: EntityRef },
    /// `POST /sessions/{id}/close`
    CloseSession { session: EntityRef },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateSession { .. } => "create_session",
            Mutation::CreateOrder { .. } => "create_order",
            Mutation::ConfirmOrder { .. } => "confirm_order",
            Mutation::CloseSession { .. } => "close_session",
        }
    }

    /// Temporary id this mutation creates, with the kind of row it creates
    pub fn creates(&self) -> Option<(EntityKind, &str)> {
        match self {
            Mutation::CreateSession { temp_id, .. } => Some((EntityKind::Session, temp_id)),
            Mutation::CreateOrder { temp_id, .. } => Some((EntityKind::SessionOrder, temp_id)),
            _ => None,
        }
    }

    /// The row reference that has to be resolved before sending
    pub fn dependency(&self) -> Option<&EntityRef> {
        match self {
            Mutation::CreateSession { .. } => None,
            Mutation::CreateOrder { session, .. } => Some(session),
            Mutation::ConfirmOrder { order } => Some(order),
            Mutation::CloseSession { session } => Some(session),
        }
    }

    /// Whether this mutation mentions `temp_id`, as creator or dependant
    pub fn references_temp(&self, temp_id: &str) -> bool {
        self.creates().is_some_and(|(_, id)| id == temp_id)
            || self
                .dependency()
                .and_then(EntityRef::temp_id)
                .is_some_and(|id| id == temp_id)
    }

    /// Kind and raw id of the cached row this mutation changes
    pub fn target(&self) -> (EntityKind, &str) {
        match self {
            Mutation::CreateSession { temp_id, .. } => (EntityKind::Session, temp_id),
            Mutation::CreateOrder { temp_id, .. } => (EntityKind::SessionOrder, temp_id),
            Mutation::ConfirmOrder { order } => (EntityKind::SessionOrder, order.as_str()),
            Mutation::CloseSession { session } => (EntityKind::Session, session.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Failed,
}

/// Why a mutation stopped being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failures exceeded the retry budget
    RetriesExhausted,
    /// Business conflict such as insufficient stock
    Conflict,
    /// The server refused the request as invalid
    Rejected,
    /// A temporary id it depends on can never be resolved
    Unresolvable,
}

/// Lifecycle of one logical write, used for logging and UI state
///
/// `OptimisticLocal → Queued → Sent → (ServerConfirmed | ServerRejectedRetryable
/// | ServerRejectedTerminal) → Reconciled | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    OptimisticLocal,
    Queued,
    Sent,
    ServerConfirmed,
    ServerRejectedRetryable,
    ServerRejectedTerminal,
    Reconciled,
    Failed,
}

impl WriteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteState::OptimisticLocal => "optimistic_local",
            WriteState::Queued => "queued",
            WriteState::Sent => "sent",
            WriteState::ServerConfirmed => "server_confirmed",
            WriteState::ServerRejectedRetryable => "server_rejected_retryable",
            WriteState::ServerRejectedTerminal => "server_rejected_terminal",
            WriteState::Reconciled => "reconciled",
            WriteState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WriteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Queue position, strictly increasing
    pub seq: u64,
    pub mutation: Mutation,
    pub status: MutationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureKind>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Not sent before this time (ms), set by backoff
    pub next_attempt_at: i64,
}

impl PendingMutation {
    pub fn new(seq: u64, mutation: Mutation, now: i64) -> Self {
        Self {
            seq,
            mutation,
            status: MutationStatus::Pending,
            retry_count: 0,
            last_error: None,
            failure: None,
            created_at: now,
            updated_at: now,
            next_attempt_at: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == MutationStatus::Failed
    }

    /// Pending and out of backoff
    pub fn is_due(&self, now: i64) -> bool {
        self.status == MutationStatus::Pending && self.next_attempt_at <= now
    }

    /// Where a stored entry sits in its write lifecycle; entries leave the
    /// queue once reconciled
    pub fn write_state(&self) -> WriteState {
        match self.status {
            MutationStatus::Pending if self.retry_count > 0 => WriteState::ServerRejectedRetryable,
            MutationStatus::Pending => WriteState::Queued,
            MutationStatus::Failed => WriteState::Failed,
        }
    }

    /// Record a terminal failure
    pub fn fail(&mut self, kind: FailureKind, error: impl Into<String>, now: i64) {
        self.status = MutationStatus::Failed;
        self.failure = Some(kind);
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Back to the queue with a fresh retry budget
    pub fn reset_for_retry(&mut self, now: i64) {
        self.status = MutationStatus::Pending;
        self.failure = None;
        self.retry_count = 0;
        self.next_attempt_at = 0;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_order(temp_id: &str, session: EntityRef) -> Mutation {
        Mutation::CreateOrder {
            temp_id: temp_id.into(),
            session,
            items: vec![],
        }
    }

    #[test]
    fn test_references_temp() {
        let m = create_order("temp_o", EntityRef::Temp("temp_s".into()));
        assert!(m.references_temp("temp_o"));
        assert!(m.references_temp("temp_s"));
        assert!(!m.references_temp("temp_x"));

        let m = Mutation::CloseSession {
            session: EntityRef::Server("temp_s".into()),
        };
        assert!(!m.references_temp("temp_s"));
    }

    #[test]
    fn test_creates_and_target() {
        let m = Mutation::CreateSession {
            temp_id: "temp_s".into(),
            table_id: None,
            guest_count: 2,
        };
        assert_eq!(m.creates(), Some((EntityKind::Session, "temp_s")));
        assert!(m.dependency().is_none());

        let m = Mutation::ConfirmOrder {
            order: EntityRef::Server("17".into()),
        };
        assert!(m.creates().is_none());
        assert_eq!(m.target(), (EntityKind::SessionOrder, "17"));
    }

    #[test]
    fn test_serde_tagged_shape() {
        let m = Mutation::CloseSession {
            session: EntityRef::Server("5".into()),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "close_session", "session": {"type": "server", "id": "5"}})
        );
    }

    #[test]
    fn test_due_and_state_transitions() {
        let mut entry = PendingMutation::new(1, create_order("temp_o", EntityRef::Server("1".into())), 100);
        assert!(entry.is_due(100));
        assert_eq!(entry.write_state(), WriteState::Queued);

        entry.retry_count = 1;
        entry.next_attempt_at = 200;
        assert!(!entry.is_due(150));
        assert_eq!(entry.write_state(), WriteState::ServerRejectedRetryable);

        entry.fail(FailureKind::RetriesExhausted, "timeout", 300);
        assert!(entry.is_failed());
        assert_eq!(entry.write_state(), WriteState::Failed);
        assert!(!entry.is_due(1_000));

        entry.reset_for_retry(400);
        assert!(entry.is_due(400));
        assert_eq!(entry.retry_count, 0);
        assert!(entry.failure.is_none());
        assert_eq!(entry.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_write_state_matches_serde_name() {
        for state in [
            WriteState::OptimisticLocal,
            WriteState::ServerRejectedRetryable,
            WriteState::Reconciled,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.to_string()));
        }
    }
}
