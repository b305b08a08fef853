//! Persistence collaborator interface and an in-memory implementation.
//!
//! The core never performs I/O on its own. Callers fetch snapshots through
//! a [`RotationStore`], run the pure computations, and write back only the
//! generated selection periods.
//!
//! [`MemoryStore`] is provided for tests and local development.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use rota_id::OrgId;

use crate::config::RotationConfig;
use crate::error::StoreError;
use crate::model::{
    parse_date, ActivePointer, PeriodPhase, Reservation, SecondaryPhaseStatus, SelectionPeriod,
    UsageCounter, WorkWeekend,
};

/// Result of a batch period insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// All rows were written.
    Inserted(usize),
    /// A uniqueness constraint rejected the batch; nothing was written.
    Conflict,
}

/// Read/write access to rotation data.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Organizations that have a rotation configured.
    async fn list_org_ids(&self) -> Result<Vec<OrgId>, StoreError>;

    /// The configuration in effect for `year`, if any.
    async fn get_rotation_config(
        &self,
        org_id: OrgId,
        year: i32,
    ) -> Result<Option<RotationConfig>, StoreError>;

    /// Periods for the organization, optionally limited to one rotation year,
    /// ordered by phase then sequence index.
    async fn list_selection_periods(
        &self,
        org_id: OrgId,
        rotation_year: Option<i32>,
    ) -> Result<Vec<SelectionPeriod>, StoreError>;

    /// Insert a batch atomically. Must reject duplicates of
    /// `(org_id, rotation_year, phase, sequence_index)` with
    /// [`InsertOutcome::Conflict`] rather than an error.
    async fn insert_selection_periods(
        &self,
        rows: &[SelectionPeriod],
    ) -> Result<InsertOutcome, StoreError>;

    async fn get_usage_counters(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Vec<UsageCounter>, StoreError>;

    async fn get_secondary_status(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Option<SecondaryPhaseStatus>, StoreError>;

    async fn get_active_pointer(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<ActivePointer, StoreError>;

    /// Groups marked done out-of-band for the rotation year.
    async fn list_completed_groups(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// Reservations whose check-in falls in `[from, to]`. Rows whose dates do
    /// not parse may be included; the reminder builder skips them.
    async fn list_reservations(
        &self,
        org_id: OrgId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn list_work_weekends(&self, org_id: OrgId) -> Result<Vec<WorkWeekend>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    configs: BTreeMap<OrgId, RotationConfig>,
    periods: Vec<SelectionPeriod>,
    usage: BTreeMap<(OrgId, i32), Vec<UsageCounter>>,
    secondary: BTreeMap<(OrgId, i32), SecondaryPhaseStatus>,
    pointers: BTreeMap<(OrgId, i32), ActivePointer>,
    completed: BTreeMap<(OrgId, i32), BTreeSet<String>>,
    reservations: Vec<Reservation>,
    work_weekends: Vec<WorkWeekend>,
    insert_calls: usize,
}

/// In-memory [`RotationStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn put_config(&self, config: RotationConfig) {
        self.lock().configs.insert(config.org_id, config);
    }

    pub fn put_usage(&self, org_id: OrgId, rotation_year: i32, counters: Vec<UsageCounter>) {
        self.lock().usage.insert((org_id, rotation_year), counters);
    }

    pub fn put_secondary_status(&self, status: SecondaryPhaseStatus) {
        self.lock()
            .secondary
            .insert((status.org_id, status.rotation_year), status);
    }

    pub fn put_active_pointer(&self, org_id: OrgId, rotation_year: i32, pointer: ActivePointer) {
        self.lock().pointers.insert((org_id, rotation_year), pointer);
    }

    pub fn mark_completed(&self, org_id: OrgId, rotation_year: i32, group: impl Into<String>) {
        self.lock()
            .completed
            .entry((org_id, rotation_year))
            .or_default()
            .insert(group.into());
    }

    pub fn add_reservation(&self, reservation: Reservation) {
        self.lock().reservations.push(reservation);
    }

    pub fn add_work_weekend(&self, work_weekend: WorkWeekend) {
        self.lock().work_weekends.push(work_weekend);
    }

    /// Number of `insert_selection_periods` calls seen, including conflicts.
    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }
}

fn period_key(p: &SelectionPeriod) -> (OrgId, i32, PeriodPhase, u32) {
    (p.org_id, p.rotation_year, p.phase, p.sequence_index)
}

#[async_trait]
impl RotationStore for MemoryStore {
    async fn list_org_ids(&self) -> Result<Vec<OrgId>, StoreError> {
        Ok(self.lock().configs.keys().copied().collect())
    }

    async fn get_rotation_config(
        &self,
        org_id: OrgId,
        _year: i32,
    ) -> Result<Option<RotationConfig>, StoreError> {
        Ok(self.lock().configs.get(&org_id).cloned())
    }

    async fn list_selection_periods(
        &self,
        org_id: OrgId,
        rotation_year: Option<i32>,
    ) -> Result<Vec<SelectionPeriod>, StoreError> {
        let mut rows: Vec<SelectionPeriod> = self
            .lock()
            .periods
            .iter()
            .filter(|p| p.org_id == org_id)
            .filter(|p| rotation_year.is_none_or(|y| p.rotation_year == y))
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.rotation_year, p.phase, p.sequence_index));
        Ok(rows)
    }

    async fn insert_selection_periods(
        &self,
        rows: &[SelectionPeriod],
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.lock();
        state.insert_calls += 1;

        let existing: BTreeSet<_> = state.periods.iter().map(period_key).collect();
        let mut batch = BTreeSet::new();
        for row in rows {
            let key = period_key(row);
            if existing.contains(&key) || !batch.insert(key) {
                return Ok(InsertOutcome::Conflict);
            }
        }

        state.periods.extend_from_slice(rows);
        Ok(InsertOutcome::Inserted(rows.len()))
    }

    async fn get_usage_counters(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Vec<UsageCounter>, StoreError> {
        Ok(self
            .lock()
            .usage
            .get(&(org_id, rotation_year))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_secondary_status(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Option<SecondaryPhaseStatus>, StoreError> {
        Ok(self.lock().secondary.get(&(org_id, rotation_year)).cloned())
    }

    async fn get_active_pointer(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<ActivePointer, StoreError> {
        Ok(self
            .lock()
            .pointers
            .get(&(org_id, rotation_year))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_completed_groups(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .lock()
            .completed
            .get(&(org_id, rotation_year))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_reservations(
        &self,
        org_id: OrgId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .lock()
            .reservations
            .iter()
            .filter(|r| r.org_id == org_id)
            .filter(|r| match parse_date(&r.check_in) {
                Ok(d) => from <= d && d <= to,
                Err(_) => true,
            })
            .cloned()
            .collect())
    }

    async fn list_work_weekends(&self, org_id: OrgId) -> Result<Vec<WorkWeekend>, StoreError> {
        Ok(self
            .lock()
            .work_weekends
            .iter()
            .filter(|w| w.org_id == org_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rota_id::{ReservationId, SelectionPeriodId};

    fn period(org_id: OrgId, seq: u32) -> SelectionPeriod {
        let start = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
        SelectionPeriod {
            id: SelectionPeriodId::new(),
            org_id,
            rotation_year: 2026,
            group_name: format!("G{seq}"),
            sequence_index: seq,
            phase: PeriodPhase::Primary,
            start_date: start,
            end_date: start,
            completed: false,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_keys() {
        let store = MemoryStore::new();
        let org = OrgId::new();

        let first = store
            .insert_selection_periods(&[period(org, 0), period(org, 1)])
            .await
            .unwrap();
        assert_eq!(first, InsertOutcome::Inserted(2));

        let second = store
            .insert_selection_periods(&[period(org, 1), period(org, 2)])
            .await
            .unwrap();
        assert_eq!(second, InsertOutcome::Conflict);

        // Conflicting batch left nothing behind.
        let rows = store.list_selection_periods(org, Some(2026)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_reservations_filtered_by_check_in() {
        let store = MemoryStore::new();
        let org = OrgId::new();
        for (i, check_in) in ["2026-01-10", "2026-03-01", "not-a-date"].iter().enumerate() {
            store.add_reservation(Reservation {
                id: ReservationId::new(),
                org_id: org,
                group_name: format!("G{i}"),
                recipient: "guest@example.com".into(),
                check_in: check_in.to_string(),
                check_out: "2026-03-05".into(),
            });
        }

        let rows = store
            .list_reservations(
                org,
                NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            )
            .await
            .unwrap();
        let groups: Vec<_> = rows.iter().map(|r| r.group_name.as_str()).collect();
        assert_eq!(groups, vec!["G0", "G2"]);
    }
}
