//! Error types for the rotation core.
//!
//! Pure computations in this crate never fail. These errors cover the two
//! places where a caller can hand in something unusable: a configuration
//! being validated, and a persistence collaborator reporting trouble.

use thiserror::Error;

/// Errors reported by a [`RotationStore`](crate::store::RotationStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded into a model type.
    #[error("corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },
}

/// Errors produced while validating a rotation configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `start_month` outside 1..=12.
    #[error("start month must be 1-12, got {0}")]
    InvalidStartMonth(u32),

    /// A window length of zero days.
    #[error("{field} must be at least one day")]
    EmptyWindow { field: &'static str },

    /// The same group appears twice in the base order.
    #[error("duplicate group in rotation order: {0}")]
    DuplicateGroup(String),

    /// Unknown direction policy string.
    #[error("unknown direction policy: {0}")]
    UnknownDirection(String),
}

/// Errors reported by a [`ReminderDispatcher`](crate::dispatch::ReminderDispatcher).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The downstream queue refused the reminder.
    #[error("reminder {reminder_id} rejected: {reason}")]
    Rejected { reminder_id: String, reason: String },
}
