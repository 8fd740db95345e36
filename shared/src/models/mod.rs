//! Data models
//!
//! Mirrors of the backend rows cached locally. IDs are server-issued strings;
//! rows created offline carry a temporary id until the server confirms them.

pub mod category;
pub mod dining_table;
pub mod package;
pub mod product;
pub mod session;
pub mod session_order;

// Re-exports
pub use category::*;
pub use dining_table::*;
pub use package::*;
pub use product::*;
pub use session::*;
pub use session_order::*;
