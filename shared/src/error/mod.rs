//! Error codes shared with the backend
//!
//! - [`ErrorCode`]: Standardized error codes carried in backend error bodies
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`ApiErrorBody`]: The JSON body the backend returns on failure
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Session / order errors
//! - 6xxx: Product errors
//! - 7xxx: Table errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{ApiErrorBody, ErrorCode};
//!
//! let body: ApiErrorBody =
//!     serde_json::from_str(r#"{"code":4102,"message":"Session already closed"}"#).unwrap();
//! assert_eq!(body.error_code(), Some(ErrorCode::SessionAlreadyClosed));
//! ```

mod category;
mod codes;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::ApiErrorBody;
