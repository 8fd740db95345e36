//! Shared types for the Crab offline sync core
//!
//! Domain models mirrored from the backend, the sync envelope that wraps
//! them in the local cache, error codes returned by the backend and small
//! utilities used by every crate in the workspace.

pub mod error;
pub mod models;
pub mod sync;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use error::{ApiErrorBody, ErrorCategory, ErrorCode};
pub use sync::{Cached, EntityKind, EntityRef, RemoteRow, SyncBadge, SyncCursor, SyncEntity, SyncState};
