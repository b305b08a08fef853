//! # rota-id
//!
//! Stable ID types, parsing, and validation for the rota scheduler.
//!
//! ## Design Principles
//!
//! - Stored records get system-generated IDs; group names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs are typed to prevent mixing different record types
//! - Derived records (reminders) get content-addressed IDs instead of ULIDs,
//!   so recomputing them yields the same identifier
//!
//! ## ID Format
//!
//! Stored record IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `org_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `selp_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `rsv_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! Reminder IDs are `rem_{hex}` where `hex` is a truncated SHA-256 over the
//! reminder's source and kind.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
