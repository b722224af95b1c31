//! Switchboard Core - Types shared by every layer of the framework
//!
//! Hosts the structured [`Status`] error that crosses process boundaries
//! inside the `error` message header.
//!
//! # Example
//!
//! ```
//! use switchboard_core::Status;
//!
//! let err = Status::not_found("user 42 not found");
//! let header = err.encode().unwrap();
//!
//! let decoded = Status::decode(&header).unwrap();
//! assert_eq!(decoded.status_code, 404);
//! assert_eq!(decoded.to_string(), "Not Found: user 42 not found");
//! ```

pub mod error;
pub mod status;

// Re-exports for convenience
pub use error::{Error, Result};
pub use status::Status;
