//! # rota-core
//!
//! Annual rotation scheduling for a shared resource.
//!
//! Member groups take turns choosing reservation dates. This crate decides
//! the turn order for a year, lays the turns out as calendar windows
//! ("selection periods"), tracks which phase of the rotation is running,
//! and derives the reminder notifications that go with all of it.
//!
//! Components, leaves first:
//!
//! - [`order`]: effective turn order for a target year
//! - [`period`]: contiguous primary-phase windows and idempotent persistence
//! - [`phase`]: primary vs secondary phase, active group, upcoming queue
//! - [`reminder`]: deterministic, deduplicated reminder list
//!
//! # Invariants
//!
//! - Every computation is a pure function of the snapshot it is given
//! - Building twice from the same snapshot yields identical output
//! - Nothing here is fatal: bad input degrades to empty results and a log line
//!
//! Persistence and notification delivery live behind the [`store`] and
//! [`dispatch`] traits.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod order;
pub mod period;
pub mod phase;
pub mod reminder;
pub mod store;

pub use config::{DirectionPolicy, RotationConfig, SelectionMode};
pub use dispatch::{LogDispatcher, MemoryDispatcher, ReminderDispatcher};
pub use error::{ConfigError, DispatchError, StoreError};
pub use model::{
    ActivePointer, PeriodPhase, Reservation, SecondaryPhaseStatus, SecondaryState,
    SelectionPeriod, UsageCounter, WorkWeekend, WorkWeekendStatus,
};
pub use order::resolve_for_year;
pub use period::{ensure_periods, generate, generate_secondary, ScheduledTurn};
pub use phase::{compute_active, PhaseInput, PhaseSnapshot, RotationPhase};
pub use reminder::{build, ReminderInput, ReminderInstance, ReminderKind, ReminderSettings};
pub use store::{InsertOutcome, MemoryStore, RotationStore};
