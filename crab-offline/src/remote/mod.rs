//! Backend interface
//!
//! [`RemoteBackend`] is the seam between the sync core and the POS server.
//! [`HttpBackend`] talks to the real REST API; tests plug in an in-memory
//! implementation.

mod http;

pub use http::{HttpBackend, StaticToken, TokenProvider};

use async_trait::async_trait;
use shared::models::{Session, SessionCreate, SessionOrder, SessionOrderCreate};
use shared::{EntityKind, ErrorCategory, ErrorCode, RemoteRow, SyncCursor};
use thiserror::Error;

/// Backend error
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Request never got an answer (offline, DNS, timeout, connection reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with an error status
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },

    /// Server answered with a body we could not decode
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// How the mutation queue reacts to a [`RemoteError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry later with backoff
    Transient,
    /// The server already holds the requested state ("already closed")
    AlreadyApplied,
    /// Business conflict, never retried automatically
    Conflict,
    /// Request refused as invalid
    Rejected,
}

impl RemoteError {
    pub fn api(status: u16, code: Option<ErrorCode>, message: impl Into<String>) -> Self {
        RemoteError::Api {
            status,
            code,
            message: message.into(),
        }
    }

    /// Request did not reach the server
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    pub fn classify(&self) -> FailureClass {
        let RemoteError::Api {
            status,
            code,
            message,
        } = self
        else {
            return FailureClass::Transient;
        };

        let message = message.to_lowercase();
        if code.is_some_and(|c| c.is_already_done())
            || message.contains("already closed")
            || message.contains("already confirmed")
        {
            return FailureClass::AlreadyApplied;
        }
        if code.is_some_and(|c| c.is_stock_conflict()) || message.contains("insufficient stock") {
            return FailureClass::Conflict;
        }
        // 401: token refresh is the auth provider's job, the write stays queued
        if matches!(status, 401 | 408 | 429)
            || *status >= 500
            || code.is_some_and(|c| c.category() == ErrorCategory::System)
        {
            return FailureClass::Transient;
        }
        FailureClass::Rejected
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::InvalidResponse(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// POS backend operations used by the sync core
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Rows of `kind` strictly after `after` in `(last_modified, id)` order,
    /// at most `limit` of them
    ///
    /// A page may be shorter than `limit`; only an empty page means there is
    /// nothing left.
    async fn fetch_rows(
        &self,
        kind: EntityKind,
        after: Option<&SyncCursor>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRow>>;

    async fn create_session(&self, req: &SessionCreate) -> RemoteResult<Session>;

    async fn create_order(&self, req: &SessionOrderCreate) -> RemoteResult<SessionOrder>;

    async fn confirm_order(&self, order_id: &str) -> RemoteResult<SessionOrder>;

    async fn close_session(&self, session_id: &str) -> RemoteResult<Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_transient() {
        let err = RemoteError::Network("connection refused".into());
        assert!(err.is_connectivity());
        assert_eq!(err.classify(), FailureClass::Transient);
        assert_eq!(
            RemoteError::InvalidResponse("eof".into()).classify(),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_already_done_by_code_or_message() {
        let by_code = RemoteError::api(409, Some(ErrorCode::SessionAlreadyClosed), "Conflict");
        assert_eq!(by_code.classify(), FailureClass::AlreadyApplied);

        let by_message = RemoteError::api(400, None, "Order already confirmed");
        assert_eq!(by_message.classify(), FailureClass::AlreadyApplied);
    }

    #[test]
    fn test_stock_conflict() {
        let err = RemoteError::api(409, Some(ErrorCode::InsufficientStock), "Not enough");
        assert_eq!(err.classify(), FailureClass::Conflict);
        let err = RemoteError::api(422, None, "Insufficient stock for Latte");
        assert_eq!(err.classify(), FailureClass::Conflict);
    }

    #[test]
    fn test_status_based_classes() {
        assert_eq!(
            RemoteError::api(503, None, "unavailable").classify(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::api(429, None, "slow down").classify(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::api(400, Some(ErrorCode::SystemBusy), "busy").classify(),
            FailureClass::Transient
        );
        assert_eq!(
            RemoteError::api(400, Some(ErrorCode::ValidationFailed), "bad items").classify(),
            FailureClass::Rejected
        );
        assert_eq!(
            RemoteError::api(404, Some(ErrorCode::SessionNotFound), "missing").classify(),
            FailureClass::Rejected
        );
    }
}
