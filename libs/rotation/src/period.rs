//! Selection period layout and idempotent persistence.
//!
//! Primary periods are laid out back to back from the first day of the
//! configured start month, one window per group in turn order, and stored
//! once per (organization, rotation year). Secondary periods are computed
//! live from today's date and are not stored by this module.

use chrono::{Days, NaiveDate};
use rota_id::{OrgId, SelectionPeriodId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::RotationConfig;
use crate::error::StoreError;
use crate::model::{PeriodPhase, SecondaryPhaseStatus, SelectionPeriod, UsageCounter};
use crate::store::{InsertOutcome, RotationStore};

/// One group's turn as placed on the calendar.
///
/// Unlike [`SelectionPeriod`] a turn carries no identity, so it can be
/// computed on the fly without touching storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTurn {
    pub group_name: String,
    pub phase: PeriodPhase,
    pub sequence_index: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// True when backed by a stored period row.
    pub persisted: bool,
}

impl From<&SelectionPeriod> for ScheduledTurn {
    fn from(period: &SelectionPeriod) -> Self {
        Self {
            group_name: period.group_name.clone(),
            phase: period.phase,
            sequence_index: period.sequence_index,
            start_date: period.start_date,
            end_date: period.end_date,
            persisted: true,
        }
    }
}

/// Inclusive end of a window of `window_days` starting at `start`.
pub(crate) fn window_end(start: NaiveDate, window_days: u32) -> Option<NaiveDate> {
    start.checked_add_days(Days::new(u64::from(window_days.saturating_sub(1))))
}

pub(crate) fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

/// Lays groups out back to back from `anchor`.
///
/// Stops early (with a warning) if the calendar overflows.
fn lay_out<'a, I>(groups: I, anchor: NaiveDate, window_days: u32) -> Vec<(String, NaiveDate, NaiveDate)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    let mut start = anchor;

    for group in groups {
        let Some(end) = window_end(start, window_days) else {
            warn!(group, %start, "Selection window overflows the calendar");
            break;
        };
        out.push((group.to_string(), start, end));
        match next_day(end) {
            Some(next) => start = next,
            None => break,
        }
    }

    out
}

/// Generates primary selection periods for `selection_year`.
///
/// Periods belong to rotation year `selection_year + 1`. An empty order, a
/// zero-day window, or a month outside 1-12 yields no periods.
pub fn generate(
    org_id: OrgId,
    order: &[String],
    selection_year: i32,
    window_days: u32,
    start_month: u32,
) -> Vec<SelectionPeriod> {
    if order.is_empty() {
        return Vec::new();
    }
    if window_days == 0 {
        warn!(%org_id, "Primary window is zero days; no periods generated");
        return Vec::new();
    }
    let Some(anchor) = NaiveDate::from_ymd_opt(selection_year, start_month, 1) else {
        warn!(%org_id, start_month, selection_year, "Invalid selection start; no periods generated");
        return Vec::new();
    };

    let rotation_year = selection_year + 1;

    lay_out(order.iter().map(String::as_str), anchor, window_days)
        .into_iter()
        .enumerate()
        .map(|(index, (group_name, start_date, end_date))| SelectionPeriod {
            id: SelectionPeriodId::new(),
            org_id,
            rotation_year,
            group_name,
            sequence_index: index as u32,
            phase: PeriodPhase::Primary,
            start_date,
            end_date,
            completed: false,
        })
        .collect()
}

/// Computes the remaining secondary turns from `today`.
///
/// Walks the reversed primary order starting at the current secondary group
/// (or the top when none is set), keeps groups that still have secondary
/// turns left plus the current group, and places them back to back from
/// `today`. At most `max_periods` turns are returned.
pub fn generate_secondary(
    order: &[String],
    usage: &[UsageCounter],
    status: Option<&SecondaryPhaseStatus>,
    window_days: u32,
    max_periods: u32,
    today: NaiveDate,
) -> Vec<ScheduledTurn> {
    if order.is_empty() || window_days == 0 || max_periods == 0 {
        return Vec::new();
    }

    let reversed: Vec<&str> = order.iter().rev().map(String::as_str).collect();
    let current = status.and_then(|s| s.current_group.as_deref());
    let start_index = current
        .and_then(|g| reversed.iter().position(|r| *r == g))
        .unwrap_or(0);

    let eligible = reversed[start_index..].iter().copied().filter(|group| {
        if status.is_some_and(|s| s.is_active(group)) {
            return true;
        }
        usage
            .iter()
            .find(|c| c.group_name == *group)
            .is_some_and(UsageCounter::secondary_remaining)
    });

    lay_out(eligible.take(max_periods as usize), today, window_days)
        .into_iter()
        .enumerate()
        .map(|(index, (group_name, start_date, end_date))| ScheduledTurn {
            group_name,
            phase: PeriodPhase::Secondary,
            sequence_index: index as u32,
            start_date,
            end_date,
            persisted: false,
        })
        .collect()
}

/// Returns the primary periods for `selection_year`, generating and storing
/// them first if none exist.
///
/// Safe to call repeatedly and concurrently: when another caller wins the
/// insert race the store reports a conflict and the winner's rows are
/// returned instead.
#[instrument(skip(store, config), fields(org_id = %config.org_id))]
pub async fn ensure_periods<S>(
    store: &S,
    config: &RotationConfig,
    selection_year: i32,
) -> Result<Vec<SelectionPeriod>, StoreError>
where
    S: RotationStore + ?Sized,
{
    let rotation_year = selection_year + 1;

    let existing = primary_rows(store, config.org_id, rotation_year).await?;
    if !existing.is_empty() {
        debug!(rotation_year, count = existing.len(), "Periods already generated");
        return Ok(existing);
    }

    let order = config.effective_order(rotation_year);
    let rows = generate(
        config.org_id,
        &order,
        selection_year,
        config.primary_window_days,
        config.start_month,
    );
    if rows.is_empty() {
        return Ok(rows);
    }

    match store.insert_selection_periods(&rows).await? {
        InsertOutcome::Inserted(count) => {
            info!(rotation_year, count, "Generated selection periods");
            Ok(rows)
        }
        InsertOutcome::Conflict => {
            info!(rotation_year, "Periods were generated concurrently; using stored rows");
            primary_rows(store, config.org_id, rotation_year).await
        }
    }
}

async fn primary_rows<S>(
    store: &S,
    org_id: OrgId,
    rotation_year: i32,
) -> Result<Vec<SelectionPeriod>, StoreError>
where
    S: RotationStore + ?Sized,
{
    let mut rows: Vec<SelectionPeriod> = store
        .list_selection_periods(org_id, Some(rotation_year))
        .await?
        .into_iter()
        .filter(|p| p.phase == PeriodPhase::Primary)
        .collect();
    rows.sort_by_key(|p| p.sequence_index);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::model::{ActivePointer, Reservation, SecondaryPhaseStatus, WorkWeekend};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn counter(group: &str, secondary_used: u32, secondary_allowed: u32) -> UsageCounter {
        UsageCounter {
            group_name: group.to_string(),
            rotation_year: 2026,
            primary_used: 1,
            primary_allowed: 1,
            secondary_used,
            secondary_allowed,
        }
    }

    #[test]
    fn test_october_fourteen_day_windows() {
        let org = OrgId::new();
        let periods = generate(org, &strings(&["A", "B", "C"]), 2025, 14, 10);

        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].group_name, "A");
        assert_eq!(periods[0].start_date, date(2025, 10, 1));
        assert_eq!(periods[0].end_date, date(2025, 10, 14));
        assert_eq!(periods[1].start_date, date(2025, 10, 15));
        assert_eq!(periods[1].end_date, date(2025, 10, 28));
        assert!(periods.iter().all(|p| p.rotation_year == 2026));
        assert!(periods.iter().all(|p| p.phase == PeriodPhase::Primary));
        assert_eq!(
            periods.iter().map(|p| p.sequence_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_windows_cross_year_end() {
        let periods = generate(OrgId::new(), &strings(&["A", "B"]), 2025, 20, 12);
        assert_eq!(periods[1].start_date, date(2025, 12, 21));
        assert_eq!(periods[1].end_date, date(2026, 1, 9));
    }

    #[test]
    fn test_degenerate_inputs_yield_nothing() {
        let org = OrgId::new();
        assert!(generate(org, &[], 2025, 14, 10).is_empty());
        assert!(generate(org, &strings(&["A"]), 2025, 0, 10).is_empty());
        assert!(generate(org, &strings(&["A"]), 2025, 14, 13).is_empty());
    }

    #[test]
    fn test_secondary_reverses_and_filters() {
        let order = strings(&["A", "B", "C", "D"]);
        let usage = vec![
            counter("A", 0, 1),
            counter("B", 1, 1),
            counter("C", 0, 1),
            counter("D", 0, 0),
        ];
        let today = date(2026, 2, 1);

        let turns = generate_secondary(&order, &usage, None, 7, 10, today);
        let groups: Vec<_> = turns.iter().map(|t| t.group_name.as_str()).collect();
        assert_eq!(groups, vec!["C", "A"]);
        assert_eq!(turns[0].start_date, today);
        assert_eq!(turns[0].end_date, date(2026, 2, 7));
        assert_eq!(turns[1].start_date, date(2026, 2, 8));
        assert!(turns.iter().all(|t| !t.persisted));
    }

    #[test]
    fn test_secondary_skips_passed_groups_but_keeps_current() {
        let order = strings(&["A", "B", "C", "D"]);
        // Reversed: D C B A. B is current and has used its turn already.
        let usage = vec![
            counter("A", 0, 1),
            counter("B", 1, 1),
            counter("C", 0, 1),
            counter("D", 0, 1),
        ];
        let status = SecondaryPhaseStatus {
            org_id: OrgId::new(),
            rotation_year: 2026,
            current_group: Some("B".into()),
            started_at: Some(chrono::Utc::now()),
            turn_completed: false,
        };

        let turns = generate_secondary(&order, &usage, Some(&status), 7, 10, date(2026, 2, 1));
        let groups: Vec<_> = turns.iter().map(|t| t.group_name.as_str()).collect();
        assert_eq!(groups, vec!["B", "A"]);
    }

    #[test]
    fn test_secondary_respects_max_periods() {
        let order = strings(&["A", "B", "C"]);
        let usage = vec![counter("A", 0, 1), counter("B", 0, 1), counter("C", 0, 1)];
        let turns = generate_secondary(&order, &usage, None, 7, 2, date(2026, 2, 1));
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_periods_is_idempotent() {
        let store = MemoryStore::new();
        let config = sample_config(&["A", "B", "C"]);

        let first = ensure_periods(&store, &config, 2025).await.unwrap();
        let second = ensure_periods(&store, &config, 2025).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_periods_uses_rotated_order() {
        let store = MemoryStore::new();
        // Base 2024; rotation year 2026 is two steps on.
        let config = sample_config(&["A", "B", "C"]);
        let rows = ensure_periods(&store, &config, 2025).await.unwrap();
        let groups: Vec<_> = rows.iter().map(|p| p.group_name.as_str()).collect();
        assert_eq!(groups, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_ensure_periods_keeps_rows_from_another_writer() {
        let store = MemoryStore::new();
        let config = sample_config(&["A", "B"]);

        // Another writer got there first with its own rows.
        let winner = generate(config.org_id, &strings(&["X", "Y"]), 2025, 14, 10);
        store.insert_selection_periods(&winner).await.unwrap();

        let rows = ensure_periods(&store, &config, 2025).await.unwrap();
        assert_eq!(rows, winner);
    }

    /// Hides the other writer's rows from the first read, the way a
    /// concurrent caller sees the table just before both try to insert.
    struct RacingStore {
        inner: MemoryStore,
        winner: Vec<SelectionPeriod>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl RotationStore for RacingStore {
        async fn list_org_ids(&self) -> Result<Vec<OrgId>, StoreError> {
            self.inner.list_org_ids().await
        }

        async fn get_rotation_config(
            &self,
            org_id: OrgId,
            year: i32,
        ) -> Result<Option<RotationConfig>, StoreError> {
            self.inner.get_rotation_config(org_id, year).await
        }

        async fn list_selection_periods(
            &self,
            org_id: OrgId,
            rotation_year: Option<i32>,
        ) -> Result<Vec<SelectionPeriod>, StoreError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Vec::new());
            }
            self.inner.list_selection_periods(org_id, rotation_year).await
        }

        async fn insert_selection_periods(
            &self,
            rows: &[SelectionPeriod],
        ) -> Result<InsertOutcome, StoreError> {
            self.inner.insert_selection_periods(&self.winner).await?;
            self.inner.insert_selection_periods(rows).await
        }

        async fn get_usage_counters(
            &self,
            org_id: OrgId,
            rotation_year: i32,
        ) -> Result<Vec<UsageCounter>, StoreError> {
            self.inner.get_usage_counters(org_id, rotation_year).await
        }

        async fn get_secondary_status(
            &self,
            org_id: OrgId,
            rotation_year: i32,
        ) -> Result<Option<SecondaryPhaseStatus>, StoreError> {
            self.inner.get_secondary_status(org_id, rotation_year).await
        }

        async fn get_active_pointer(
            &self,
            org_id: OrgId,
            rotation_year: i32,
        ) -> Result<ActivePointer, StoreError> {
            self.inner.get_active_pointer(org_id, rotation_year).await
        }

        async fn list_completed_groups(
            &self,
            org_id: OrgId,
            rotation_year: i32,
        ) -> Result<BTreeSet<String>, StoreError> {
            self.inner.list_completed_groups(org_id, rotation_year).await
        }

        async fn list_reservations(
            &self,
            org_id: OrgId,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<Reservation>, StoreError> {
            self.inner.list_reservations(org_id, from, to).await
        }

        async fn list_work_weekends(
            &self,
            org_id: OrgId,
        ) -> Result<Vec<WorkWeekend>, StoreError> {
            self.inner.list_work_weekends(org_id).await
        }
    }

    #[tokio::test]
    async fn test_ensure_periods_returns_winner_after_lost_insert() {
        let config = sample_config(&["A", "B"]);
        let winner = generate(config.org_id, &strings(&["X", "Y"]), 2025, 14, 10);
        let store = RacingStore {
            inner: MemoryStore::new(),
            winner: winner.clone(),
            reads: AtomicUsize::new(0),
        };

        let rows = ensure_periods(&store, &config, 2025).await.unwrap();

        assert_eq!(rows, winner);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.insert_calls(), 2);
        let stored = store
            .inner
            .list_selection_periods(config.org_id, Some(2026))
            .await
            .unwrap();
        assert_eq!(stored, winner);
    }

    #[tokio::test]
    async fn test_ensure_periods_empty_config() {
        let store = MemoryStore::new();
        let config = sample_config(&[]);
        let rows = ensure_periods(&store, &config, 2025).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(store.insert_calls(), 0);
    }

    proptest! {
        #[test]
        fn periods_are_contiguous(
            len in 0usize..12,
            window in 1u32..60,
            month in 1u32..=12,
            year in 2000i32..2100,
        ) {
            let order: Vec<String> = (0..len).map(|i| format!("G{i}")).collect();
            let periods = generate(OrgId::new(), &order, year, window, month);

            prop_assert_eq!(periods.len(), order.len());
            for p in &periods {
                prop_assert_eq!((p.end_date - p.start_date).num_days() + 1, i64::from(window));
            }
            for pair in periods.windows(2) {
                prop_assert_eq!(next_day(pair[0].end_date), Some(pair[1].start_date));
            }
        }
    }
}
