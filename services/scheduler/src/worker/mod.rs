//! Background workers.
//!
//! - [`ChangeListener`] turns Postgres notifications into [`ChangeNotice`]s
//! - [`RecomputeWorker`] re-plans affected organizations and dispatches new
//!   reminders, with a periodic full resync as a backstop

mod listener;
mod recompute;

pub use listener::{parse_notice, ChangeListener};
pub use recompute::{PassStats, RecomputeWorker, WorkerConfig};

use rota_id::OrgId;

/// Something changed and plans need recomputing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeNotice {
    /// Data for one organization changed.
    Org(OrgId),
    /// Scope unknown (unparseable payload, missed notifications).
    All,
}
