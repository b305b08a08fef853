//! Notification dispatch interface.
//!
//! The scheduler hands finished reminders to a dispatcher; delivery (email,
//! SMS) is someone else's job. [`LogDispatcher`] records each hand-off as a
//! structured log event, [`MemoryDispatcher`] keeps them for inspection in
//! tests.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::DispatchError;
use crate::reminder::ReminderInstance;

/// Consumer of computed reminders.
#[async_trait]
pub trait ReminderDispatcher: Send + Sync {
    /// Queue one reminder for delivery at its `send_at`.
    async fn dispatch(&self, reminder: &ReminderInstance) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs.
#[derive(Debug, Default)]
pub struct LogDispatcher;

#[async_trait]
impl ReminderDispatcher for LogDispatcher {
    async fn dispatch(&self, reminder: &ReminderInstance) -> Result<(), DispatchError> {
        info!(
            reminder_id = %reminder.id,
            source = reminder.source_type.as_str(),
            kind = %reminder.kind.key(),
            send_at = %reminder.send_at,
            recipient = %reminder.recipient,
            subject = %reminder.subject,
            "Reminder queued"
        );
        Ok(())
    }
}

/// Dispatcher that keeps every reminder it receives.
#[derive(Debug, Default)]
pub struct MemoryDispatcher {
    sent: Mutex<Vec<ReminderInstance>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dispatched so far, in arrival order.
    pub fn sent(&self) -> Vec<ReminderInstance> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReminderDispatcher for MemoryDispatcher {
    async fn dispatch(&self, reminder: &ReminderInstance) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(reminder.clone());
        Ok(())
    }
}
