//! Recompute worker.
//!
//! Re-plans organizations when their data changes and hands reminders it has
//! not seen before to the dispatcher. A periodic resync re-plans everything
//! in case a notification was missed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rota_core::{ReminderDispatcher, RotationStore, StoreError};
use rota_id::OrgId;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::ChangeNotice;
use crate::ledger::DispatchLedger;
use crate::planner::Planner;

/// Recompute worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between full resync passes.
    pub resync_interval: Duration,
    /// How long dispatched reminders stay in the ledger after their send time.
    pub ledger_retention: chrono::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            ledger_retention: chrono::Duration::days(2),
        }
    }
}

/// Statistics from one recompute pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub orgs_processed: usize,
    pub orgs_skipped: usize,
    pub orgs_failed: usize,
    pub reminders_dispatched: usize,
    pub dispatch_failures: usize,
}

impl PassStats {
    fn absorb(&mut self, other: PassStats) {
        self.orgs_processed += other.orgs_processed;
        self.orgs_skipped += other.orgs_skipped;
        self.orgs_failed += other.orgs_failed;
        self.reminders_dispatched += other.reminders_dispatched;
        self.dispatch_failures += other.dispatch_failures;
    }
}

/// Worker that keeps plans and reminders current.
pub struct RecomputeWorker<S: ?Sized, D: ?Sized> {
    planner: Planner<S>,
    dispatcher: Arc<D>,
    config: WorkerConfig,
    ledger: DispatchLedger,
    clock: fn() -> DateTime<Utc>,
}

impl<S, D> RecomputeWorker<S, D>
where
    S: RotationStore + ?Sized,
    D: ReminderDispatcher + ?Sized,
{
    pub fn new(planner: Planner<S>, dispatcher: Arc<D>, config: WorkerConfig) -> Self {
        Self {
            planner,
            dispatcher,
            config,
            ledger: DispatchLedger::new(),
            clock: Utc::now,
        }
    }

    /// Replace the wall clock, for tests and previews.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &DispatchLedger {
        &self.ledger
    }

    /// Run until shutdown is signaled.
    ///
    /// The first resync tick fires immediately, so a full pass runs on
    /// startup. If the notice channel closes the worker keeps going on the
    /// resync interval alone.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut notices: mpsc::Receiver<ChangeNotice>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            resync_secs = self.config.resync_interval.as_secs(),
            "Starting recompute worker"
        );

        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notices_open = true;

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    if let Err(e) = self.recompute_all().await {
                        error!(error = %e, "Resync pass failed");
                    }
                }
                notice = notices.recv(), if notices_open => match notice {
                    Some(first) => {
                        let pending = drain(first, &mut notices);
                        if let Err(e) = self.apply(pending).await {
                            error!(error = %e, "Recompute after change failed");
                        }
                    }
                    None => {
                        warn!("Change notice channel closed; relying on resync");
                        notices_open = false;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Recompute worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn apply(&mut self, pending: Pending) -> Result<PassStats, StoreError> {
        match pending {
            Pending::All => self.recompute_all().await,
            Pending::Orgs(orgs) => {
                let now = (self.clock)();
                let mut stats = PassStats::default();
                for org_id in orgs {
                    stats.absorb(self.recompute_org(org_id, now).await);
                }
                Ok(stats)
            }
        }
    }

    /// Re-plan every organization. One organization failing does not stop
    /// the others.
    pub async fn recompute_all(&mut self) -> Result<PassStats, StoreError> {
        let now = (self.clock)();
        let org_ids = self.planner.store().list_org_ids().await?;
        debug!(org_count = org_ids.len(), "Recomputing all organizations");

        let mut stats = PassStats::default();
        for org_id in org_ids {
            stats.absorb(self.recompute_org(org_id, now).await);
        }

        let pruned = self.ledger.prune(now - self.config.ledger_retention);

        info!(
            orgs_processed = stats.orgs_processed,
            orgs_skipped = stats.orgs_skipped,
            orgs_failed = stats.orgs_failed,
            reminders_dispatched = stats.reminders_dispatched,
            dispatch_failures = stats.dispatch_failures,
            ledger_pruned = pruned,
            "Resync pass complete"
        );

        Ok(stats)
    }

    /// Re-plan one organization and dispatch its new reminders.
    pub async fn recompute_org(&mut self, org_id: OrgId, now: DateTime<Utc>) -> PassStats {
        let mut stats = PassStats::default();

        let plan = match self.planner.plan(org_id, now).await {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                stats.orgs_skipped += 1;
                return stats;
            }
            Err(e) => {
                warn!(org_id = %org_id, error = %e, "Failed to plan organization");
                stats.orgs_failed += 1;
                return stats;
            }
        };
        stats.orgs_processed += 1;

        let fresh: Vec<_> = plan
            .reminders
            .iter()
            .filter(|r| self.ledger.is_new(r))
            .collect();

        for reminder in fresh {
            match self.dispatcher.dispatch(reminder).await {
                Ok(()) => {
                    self.ledger.record(reminder);
                    stats.reminders_dispatched += 1;
                }
                Err(e) => {
                    // Left out of the ledger so the next pass retries it.
                    warn!(org_id = %org_id, reminder_id = %reminder.id, error = %e, "Dispatch failed");
                    stats.dispatch_failures += 1;
                }
            }
        }

        stats
    }
}

/// Work collected from a burst of notices.
#[derive(Debug, PartialEq, Eq)]
enum Pending {
    All,
    Orgs(BTreeSet<OrgId>),
}

/// Folds `first` and anything already queued behind it into one unit of work.
fn drain(first: ChangeNotice, notices: &mut mpsc::Receiver<ChangeNotice>) -> Pending {
    let mut orgs = BTreeSet::new();
    let mut all = false;

    let mut next = Some(first);
    while let Some(notice) = next {
        match notice {
            ChangeNotice::All => all = true,
            ChangeNotice::Org(org_id) => {
                orgs.insert(org_id);
            }
        }
        next = notices.try_recv().ok();
    }

    if all {
        Pending::All
    } else {
        Pending::Orgs(orgs)
    }
}
