//! Record of reminders already handed to the dispatcher.
//!
//! Every pass rebuilds the full reminder list, so without this each one
//! would be dispatched again on every change notification. A reminder is
//! claimed once per `(id, send_at)`; if its source moves and `send_at`
//! changes, it is dispatched again.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rota_core::ReminderInstance;
use rota_id::ReminderId;

#[derive(Debug, Default)]
pub struct DispatchLedger {
    sent: BTreeMap<ReminderId, DateTime<Utc>>,
}

impl DispatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `reminder` has not been dispatched at this send time.
    pub fn is_new(&self, reminder: &ReminderInstance) -> bool {
        self.sent.get(&reminder.id) != Some(&reminder.send_at)
    }

    /// Marks `reminder` as dispatched.
    pub fn record(&mut self, reminder: &ReminderInstance) {
        self.sent.insert(reminder.id.clone(), reminder.send_at);
    }

    /// Forgets reminders whose send time is before `cutoff`. Returns how many
    /// were dropped.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sent.len();
        self.sent.retain(|_, send_at| *send_at >= cutoff);
        before - self.sent.len()
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
