//! Postgres-backed [`RotationStore`].
//!
//! Rows are mapped by hand with `try_get`; integer columns are checked on
//! the way in so a negative count surfaces as [`StoreError::Corrupt`] rather
//! than wrapping.
//!
//! Reservations and work weekends are written by other systems. A row of
//! theirs that does not decode is logged and skipped so the remaining events
//! of the organization still get reminders.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use rota_core::model::DATE_FORMAT;
use rota_core::{
    ActivePointer, DirectionPolicy, InsertOutcome, PeriodPhase, Reservation, RotationConfig,
    RotationStore, SecondaryPhaseStatus, SelectionMode, SelectionPeriod, StoreError, UsageCounter,
    WorkWeekend, WorkWeekendStatus,
};
use rota_id::{OrgId, ReservationId, SelectionPeriodId, WorkWeekendId};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};
use tracing::{debug, warn};

use super::error::{corrupt, unavailable};

/// Store for rotation data in Postgres.
#[derive(Clone)]
pub struct PgRotationStore {
    pool: PgPool,
}

impl PgRotationStore {
    /// Create a new rotation store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn column_u32(table: &'static str, column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt(table, format!("{column} is negative: {value}")))
}

fn bind_i32(table: &'static str, column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| corrupt(table, format!("{column} out of range: {value}")))
}

fn get<'r, T>(table: &'static str, row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| corrupt(table, format!("{column}: {e}")))
}

fn org_id_column(table: &'static str, row: &PgRow) -> Result<OrgId, StoreError> {
    let raw: String = get(table, row, "org_id")?;
    OrgId::parse(&raw).map_err(|e| corrupt(table, format!("org_id '{raw}': {e}")))
}

fn config_from_row(row: &PgRow) -> Result<RotationConfig, StoreError> {
    const TABLE: &str = "rotation_configs";

    let org_id = org_id_column(TABLE, row)?;
    let raw_order: Vec<String> = get(TABLE, row, "base_order")?;
    let direction: String = get(TABLE, row, "direction")?;
    let direction = DirectionPolicy::parse(&direction).map_err(|e| corrupt(TABLE, e.to_string()))?;

    let mut config = RotationConfig::from_legacy_order(
        org_id,
        get(TABLE, row, "base_year")?,
        &raw_order,
        direction,
        column_u32(TABLE, "primary_window_days", get(TABLE, row, "primary_window_days")?)?,
        column_u32(TABLE, "secondary_window_days", get(TABLE, row, "secondary_window_days")?)?,
        column_u32(TABLE, "secondary_max_periods", get(TABLE, row, "secondary_max_periods")?)?,
        column_u32(TABLE, "start_month", get(TABLE, row, "start_month")?)?,
    );

    // An explicit mode column overrides anything the sentinels said.
    let mode: Option<String> = get(TABLE, row, "mode")?;
    if let Some(mode) = mode {
        config.mode = SelectionMode::parse(&mode)
            .ok_or_else(|| corrupt(TABLE, format!("unknown mode '{mode}'")))?;
    }

    Ok(config)
}

fn period_from_row(row: &PgRow) -> Result<SelectionPeriod, StoreError> {
    const TABLE: &str = "selection_periods";

    let id: String = get(TABLE, row, "id")?;
    let phase: String = get(TABLE, row, "phase")?;

    Ok(SelectionPeriod {
        id: SelectionPeriodId::parse(&id).map_err(|e| corrupt(TABLE, format!("id '{id}': {e}")))?,
        org_id: org_id_column(TABLE, row)?,
        rotation_year: get(TABLE, row, "rotation_year")?,
        group_name: get(TABLE, row, "group_name")?,
        sequence_index: column_u32(TABLE, "sequence_index", get(TABLE, row, "sequence_index")?)?,
        phase: PeriodPhase::parse(&phase)
            .ok_or_else(|| corrupt(TABLE, format!("unknown phase '{phase}'")))?,
        start_date: get(TABLE, row, "start_date")?,
        end_date: get(TABLE, row, "end_date")?,
        completed: get(TABLE, row, "completed")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<UsageCounter, StoreError> {
    const TABLE: &str = "usage_counters";

    Ok(UsageCounter {
        group_name: get(TABLE, row, "group_name")?,
        rotation_year: get(TABLE, row, "rotation_year")?,
        primary_used: column_u32(TABLE, "primary_used", get(TABLE, row, "primary_used")?)?,
        primary_allowed: column_u32(TABLE, "primary_allowed", get(TABLE, row, "primary_allowed")?)?,
        secondary_used: column_u32(TABLE, "secondary_used", get(TABLE, row, "secondary_used")?)?,
        secondary_allowed: column_u32(TABLE, "secondary_allowed", get(TABLE, row, "secondary_allowed")?)?,
    })
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, StoreError> {
    const TABLE: &str = "reservations";

    let id: String = get(TABLE, row, "id")?;
    Ok(Reservation {
        id: ReservationId::parse(&id).map_err(|e| corrupt(TABLE, format!("id '{id}': {e}")))?,
        org_id: org_id_column(TABLE, row)?,
        group_name: get(TABLE, row, "group_name")?,
        recipient: get(TABLE, row, "recipient")?,
        check_in: get(TABLE, row, "check_in")?,
        check_out: get(TABLE, row, "check_out")?,
    })
}

fn work_weekend_from_row(row: &PgRow) -> Result<WorkWeekend, StoreError> {
    const TABLE: &str = "work_weekends";

    let id: String = get(TABLE, row, "id")?;
    let status: String = get(TABLE, row, "status")?;
    Ok(WorkWeekend {
        id: WorkWeekendId::parse(&id).map_err(|e| corrupt(TABLE, format!("id '{id}': {e}")))?,
        org_id: org_id_column(TABLE, row)?,
        title: get(TABLE, row, "title")?,
        recipient: get(TABLE, row, "recipient")?,
        start_date: get(TABLE, row, "start_date")?,
        end_date: get(TABLE, row, "end_date")?,
        status: WorkWeekendStatus::parse(&status)
            .ok_or_else(|| corrupt(TABLE, format!("unknown status '{status}'")))?,
    })
}

/// Decodes rows one at a time, dropping the ones that fail with a warning.
fn decode_each<R, T>(
    table: &'static str,
    rows: &[R],
    row_id: impl Fn(&R) -> Option<String>,
    decode: impl Fn(&R) -> Result<T, StoreError>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    table,
                    id = row_id(row).as_deref().unwrap_or("<unreadable>"),
                    error = %e,
                    "Skipping row that does not decode"
                );
                None
            }
        })
        .collect()
}

fn raw_id(row: &PgRow) -> Option<String> {
    row.try_get("id").ok()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl RotationStore for PgRotationStore {
    async fn list_org_ids(&self) -> Result<Vec<OrgId>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT org_id FROM rotation_configs ORDER BY org_id")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;

        rows.iter()
            .map(|row| org_id_column("rotation_configs", row))
            .collect()
    }

    async fn get_rotation_config(
        &self,
        org_id: OrgId,
        year: i32,
    ) -> Result<Option<RotationConfig>, StoreError> {
        // Latest row that has taken effect, else the earliest one on file.
        let row = sqlx::query(
            r#"
            SELECT
                org_id,
                base_year,
                base_order,
                mode,
                direction,
                primary_window_days,
                secondary_window_days,
                secondary_max_periods,
                start_month
            FROM rotation_configs
            WHERE org_id = $1
            ORDER BY (base_year <= $2) DESC,
                     CASE WHEN base_year <= $2 THEN base_year ELSE -base_year END DESC
            LIMIT 1
            "#,
        )
        .bind(org_id.to_string())
        .bind(year)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(config_from_row).transpose()
    }

    async fn list_selection_periods(
        &self,
        org_id: OrgId,
        rotation_year: Option<i32>,
    ) -> Result<Vec<SelectionPeriod>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id,
                org_id,
                rotation_year,
                group_name,
                sequence_index,
                phase,
                start_date,
                end_date,
                completed
            FROM selection_periods
            WHERE org_id = $1
              AND ($2::INTEGER IS NULL OR rotation_year = $2)
            ORDER BY rotation_year, phase, sequence_index
            "#,
        )
        .bind(org_id.to_string())
        .bind(rotation_year)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(period_from_row).collect()
    }

    async fn insert_selection_periods(
        &self,
        rows: &[SelectionPeriod],
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for period in rows {
            let result = sqlx::query(
                r#"
                INSERT INTO selection_periods (
                    id,
                    org_id,
                    rotation_year,
                    group_name,
                    sequence_index,
                    phase,
                    start_date,
                    end_date,
                    completed
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (org_id, rotation_year, phase, sequence_index)
                DO NOTHING
                "#,
            )
            .bind(period.id.to_string())
            .bind(period.org_id.to_string())
            .bind(period.rotation_year)
            .bind(&period.group_name)
            .bind(bind_i32("selection_periods", "sequence_index", period.sequence_index)?)
            .bind(period.phase.as_str())
            .bind(period.start_date)
            .bind(period.end_date)
            .bind(period.completed)
            .execute(&mut *tx)
            .await;

            let skipped = match result {
                Ok(done) => done.rows_affected() == 0,
                Err(e) if is_unique_violation(&e) => true,
                Err(e) => return Err(unavailable(e)),
            };

            if skipped {
                debug!(
                    org_id = %period.org_id,
                    rotation_year = period.rotation_year,
                    sequence_index = period.sequence_index,
                    "Selection period slot already taken, rolling back batch"
                );
                tx.rollback().await.map_err(unavailable)?;
                return Ok(InsertOutcome::Conflict);
            }
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(InsertOutcome::Inserted(rows.len()))
    }

    async fn get_usage_counters(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Vec<UsageCounter>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                group_name,
                rotation_year,
                primary_used,
                primary_allowed,
                secondary_used,
                secondary_allowed
            FROM usage_counters
            WHERE org_id = $1 AND rotation_year = $2
            ORDER BY group_name
            "#,
        )
        .bind(org_id.to_string())
        .bind(rotation_year)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(usage_from_row).collect()
    }

    async fn get_secondary_status(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<Option<SecondaryPhaseStatus>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT current_group, started_at, turn_completed
            FROM secondary_phase_status
            WHERE org_id = $1 AND rotation_year = $2
            "#,
        )
        .bind(org_id.to_string())
        .bind(rotation_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        const TABLE: &str = "secondary_phase_status";
        Ok(Some(SecondaryPhaseStatus {
            org_id,
            rotation_year,
            current_group: get(TABLE, &row, "current_group")?,
            started_at: get(TABLE, &row, "started_at")?,
            turn_completed: get(TABLE, &row, "turn_completed")?,
        }))
    }

    async fn get_active_pointer(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<ActivePointer, StoreError> {
        let group_name: Option<Option<String>> = sqlx::query_scalar(
            "SELECT group_name FROM active_pointers WHERE org_id = $1 AND rotation_year = $2",
        )
        .bind(org_id.to_string())
        .bind(rotation_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(ActivePointer {
            group_name: group_name.flatten(),
        })
    }

    async fn list_completed_groups(
        &self,
        org_id: OrgId,
        rotation_year: i32,
    ) -> Result<BTreeSet<String>, StoreError> {
        let groups: Vec<String> = sqlx::query_scalar(
            "SELECT group_name FROM completed_groups WHERE org_id = $1 AND rotation_year = $2",
        )
        .bind(org_id.to_string())
        .bind(rotation_year)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(groups.into_iter().collect())
    }

    async fn list_reservations(
        &self,
        org_id: OrgId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, StoreError> {
        // check_in is free text. Well-formed ISO dates compare correctly as
        // strings; anything else is returned for the caller to reject.
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, group_name, recipient, check_in, check_out
            FROM reservations
            WHERE org_id = $1
              AND (
                btrim(check_in) !~ '^[0-9]{4}-[0-9]{2}-[0-9]{2}$'
                OR btrim(check_in) BETWEEN $2 AND $3
              )
            ORDER BY check_in, id
            "#,
        )
        .bind(org_id.to_string())
        .bind(from.format(DATE_FORMAT).to_string())
        .bind(to.format(DATE_FORMAT).to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(decode_each("reservations", &rows, raw_id, reservation_from_row))
    }

    async fn list_work_weekends(&self, org_id: OrgId) -> Result<Vec<WorkWeekend>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, org_id, title, recipient, start_date, end_date, status
            FROM work_weekends
            WHERE org_id = $1
            ORDER BY start_date, id
            "#,
        )
        .bind(org_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(decode_each("work_weekends", &rows, raw_id, work_weekend_from_row))
    }
}
