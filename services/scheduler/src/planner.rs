//! Per-organization planning pass.
//!
//! Fetches every snapshot the core needs through the store, makes sure the
//! year's primary periods exist, and runs phase tracking and reminder
//! building with a single clock reading.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use rota_core::{
    build, compute_active, ensure_periods, PhaseInput, PhaseSnapshot, ReminderInput,
    ReminderInstance, RotationStore, StoreError,
};
use rota_id::OrgId;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::ReminderDefaults;

/// Everything computed for one organization in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct OrgPlan {
    pub org_id: OrgId,
    pub selection_year: i32,
    pub rotation_year: i32,
    pub snapshot: PhaseSnapshot,
    pub reminders: Vec<ReminderInstance>,
    /// Set when the stored config failed validation. Such a plan has no
    /// selection periods; reminders for other events are still built.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_error: Option<String>,
}

/// The year whose selection round is open on `today`.
///
/// Selection for rotation year N runs from `start_month` of N-1, so before
/// that month the previous round is still the current one.
pub fn selection_year(today: NaiveDate, start_month: u32) -> i32 {
    if today.month() >= start_month {
        today.year()
    } else {
        today.year() - 1
    }
}

/// Runs the core components for one organization at a time.
pub struct Planner<S: ?Sized> {
    store: Arc<S>,
    reminders: ReminderDefaults,
}

impl<S> Planner<S>
where
    S: RotationStore + ?Sized,
{
    pub fn new(store: Arc<S>, reminders: ReminderDefaults) -> Self {
        Self { store, reminders }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Plans one organization. Returns `None` when it has no rotation config.
    ///
    /// An invalid config does not fail the pass: no periods are generated or
    /// read, and reservation, work weekend and secondary reminders are built
    /// as usual.
    #[instrument(skip_all, fields(org_id = %org_id))]
    pub async fn plan(
        &self,
        org_id: OrgId,
        now: DateTime<Utc>,
    ) -> Result<Option<OrgPlan>, StoreError> {
        let today = now.date_naive();
        let store = self.store.as_ref();

        let Some(config) = store.get_rotation_config(org_id, today.year()).await? else {
            debug!("No rotation config; nothing to plan");
            return Ok(None);
        };
        let config_error = config.validate().err().map(|e| {
            warn!(error = %e, "Invalid rotation config; planning without selection periods");
            e.to_string()
        });

        let selection_year = selection_year(today, config.start_month);
        let rotation_year = selection_year + 1;

        let (order, periods) = if config_error.is_some() {
            (Vec::new(), Vec::new())
        } else {
            ensure_periods(store, &config, selection_year).await?;
            let periods = store
                .list_selection_periods(org_id, Some(rotation_year))
                .await?;
            (config.effective_order(rotation_year), periods)
        };
        let usage = store.get_usage_counters(org_id, rotation_year).await?;
        let pointer = store.get_active_pointer(org_id, rotation_year).await?;
        let secondary = store.get_secondary_status(org_id, rotation_year).await?;
        let completed = store.list_completed_groups(org_id, rotation_year).await?;

        let horizon_end = today
            .checked_add_days(Days::new(u64::from(self.reminders.horizon_days)))
            .unwrap_or(NaiveDate::MAX);
        let reservations = store.list_reservations(org_id, today, horizon_end).await?;
        let work_weekends = store.list_work_weekends(org_id).await?;

        let snapshot = compute_active(&PhaseInput {
            order: &order,
            usage: &usage,
            periods: &periods,
            pointer: &pointer,
            secondary: secondary.as_ref(),
            primary_window_days: config.primary_window_days,
            secondary_window_days: config.secondary_window_days,
            secondary_max_periods: config.secondary_max_periods,
            today,
        });

        let settings = self.reminders.settings(config.secondary_window_days);
        let reminders = build(
            &ReminderInput {
                reservations: &reservations,
                periods: &periods,
                secondary: secondary.as_ref(),
                work_weekends: &work_weekends,
                completed_groups: &completed,
                now,
            },
            &settings,
        );

        debug!(
            rotation_year,
            phase = ?snapshot.phase,
            reminders = reminders.len(),
            "Planned organization"
        );

        Ok(Some(OrgPlan {
            org_id,
            selection_year,
            rotation_year,
            snapshot,
            reminders,
            config_error,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rota_core::{
        DirectionPolicy, MemoryStore, ReminderKind, Reservation, RotationConfig, RotationPhase,
    };
    use rota_id::ReservationId;
    use rstest::rstest;

    fn sample_config(order: &[&str]) -> RotationConfig {
        let order: Vec<String> = order.iter().map(|s| s.to_string()).collect();
        RotationConfig::from_legacy_order(
            OrgId::new(),
            2024,
            &order,
            DirectionPolicy::MoveFirstToLast,
            14,
            7,
            10,
            10,
        )
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(date(2025, 10, 1), 10, 2025)]
    #[case(date(2025, 12, 31), 10, 2025)]
    #[case(date(2026, 1, 15), 10, 2025)]
    #[case(date(2026, 9, 30), 10, 2025)]
    #[case(date(2026, 3, 1), 1, 2026)]
    fn test_selection_year(#[case] today: NaiveDate, #[case] start_month: u32, #[case] expected: i32) {
        assert_eq!(selection_year(today, start_month), expected);
    }

    #[tokio::test]
    async fn test_plan_without_config_is_none() {
        let planner = Planner::new(Arc::new(MemoryStore::new()), ReminderDefaults::default());
        let now = Utc.with_ymd_and_hms(2025, 10, 2, 8, 0, 0).unwrap();
        assert!(planner.plan(OrgId::new(), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_plan_generates_periods_once() {
        let store = Arc::new(MemoryStore::new());
        let config = sample_config(&["A", "B", "C"]);
        let org_id = config.org_id;
        store.put_config(config);

        let planner = Planner::new(store.clone(), ReminderDefaults::default());
        let now = Utc.with_ymd_and_hms(2025, 10, 2, 8, 0, 0).unwrap();

        let first = planner.plan(org_id, now).await.unwrap().unwrap();
        assert_eq!(first.selection_year, 2025);
        assert_eq!(first.rotation_year, 2026);
        assert_eq!(first.snapshot.phase, RotationPhase::Primary);

        let second = planner.plan(org_id, now).await.unwrap().unwrap();
        assert_eq!(first.reminders, second.reminders);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_still_plans_other_reminders() {
        let store = Arc::new(MemoryStore::new());
        let config = sample_config(&["A", "B", "A"]);
        let org_id = config.org_id;
        store.put_config(config);
        store.add_reservation(Reservation {
            id: ReservationId::new(),
            org_id,
            group_name: "A".into(),
            recipient: "a@example.com".into(),
            check_in: "2025-10-17".into(),
            check_out: "2025-10-20".into(),
        });

        let planner = Planner::new(store.clone(), ReminderDefaults::default());
        let now = Utc.with_ymd_and_hms(2025, 10, 10, 8, 0, 0).unwrap();
        let plan = planner.plan(org_id, now).await.unwrap().unwrap();

        assert!(plan.config_error.unwrap().contains("duplicate group"));
        assert_eq!(store.insert_calls(), 0);
        assert!(plan.snapshot.upcoming.is_empty());
        assert!(plan.snapshot.active_group.is_none());
        let kinds: Vec<_> = plan.reminders.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ReminderKind::ReservationUpcoming { days_before: 7 },
                ReminderKind::ReservationUpcoming { days_before: 3 },
                ReminderKind::ReservationUpcoming { days_before: 1 },
            ]
        );
    }
}
