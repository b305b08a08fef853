//! Snapshot types read from, and written to, the persistence collaborator.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rota_id::{OrgId, ReservationId, SelectionPeriodId, WorkWeekendId};
use serde::{Deserialize, Serialize};

/// Wire format for dates carried as raw strings.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses a raw `YYYY-MM-DD` date, tolerating surrounding whitespace.
pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
}

/// Which pass through the rotation a period belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodPhase {
    Primary,
    Secondary,
}

impl PeriodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// A window during which one group holds the exclusive right to pick dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPeriod {
    pub id: SelectionPeriodId,
    pub org_id: OrgId,
    /// The year being reserved; selection happens the year before.
    pub rotation_year: i32,
    pub group_name: String,
    pub sequence_index: u32,
    pub phase: PeriodPhase,
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub completed: bool,
}

/// Turns consumed vs allowed for one group in one rotation year.
///
/// `used > allowed` happens after manual overrides and is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub group_name: String,
    pub rotation_year: i32,
    pub primary_used: u32,
    pub primary_allowed: u32,
    pub secondary_used: u32,
    pub secondary_allowed: u32,
}

impl UsageCounter {
    pub fn primary_done(&self) -> bool {
        self.primary_used >= self.primary_allowed
    }

    pub fn secondary_remaining(&self) -> bool {
        self.secondary_used < self.secondary_allowed
    }
}

/// The externally maintained record of who holds the primary turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePointer {
    pub group_name: Option<String>,
}

impl ActivePointer {
    pub fn new(group_name: impl Into<String>) -> Self {
        Self {
            group_name: Some(group_name.into()),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Persisted secondary-phase progress for one organization and year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryPhaseStatus {
    pub org_id: OrgId,
    pub rotation_year: i32,
    pub current_group: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub turn_completed: bool,
}

/// Lifecycle of the secondary phase as observed from a status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "group", rename_all = "snake_case")]
pub enum SecondaryState {
    NotStarted,
    Active(String),
    TurnCompleted(String),
    PhaseDone,
}

impl SecondaryPhaseStatus {
    pub fn not_started(org_id: OrgId, rotation_year: i32) -> Self {
        Self {
            org_id,
            rotation_year,
            current_group: None,
            started_at: None,
            turn_completed: false,
        }
    }

    pub fn state(&self) -> SecondaryState {
        match (&self.started_at, &self.current_group) {
            (None, _) => SecondaryState::NotStarted,
            (Some(_), None) => SecondaryState::PhaseDone,
            (Some(_), Some(group)) if self.turn_completed => {
                SecondaryState::TurnCompleted(group.clone())
            }
            (Some(_), Some(group)) => SecondaryState::Active(group.clone()),
        }
    }

    /// True while `group` holds an unfinished secondary turn.
    pub fn is_active(&self, group: &str) -> bool {
        matches!(self.state(), SecondaryState::Active(ref g) if g == group)
    }

    /// The group currently holding an unfinished secondary turn, if any.
    pub fn active_group(&self) -> Option<&str> {
        if self.started_at.is_some() && !self.turn_completed {
            self.current_group.as_deref()
        } else {
            None
        }
    }

    /// When the current turn runs out: `started_at` plus the window length.
    ///
    /// Secondary turns are timed from the moment they start, not by date.
    pub fn turn_deadline(&self, window_days: u32) -> Option<DateTime<Utc>> {
        self.started_at?
            .checked_add_signed(Duration::days(i64::from(window_days)))
    }
}

/// A booking whose dates are carried as they were entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub org_id: OrgId,
    pub group_name: String,
    pub recipient: String,
    pub check_in: String,
    pub check_out: String,
}

/// Approval state of a work weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkWeekendStatus {
    Draft,
    PendingApproval,
    FullyApproved,
    Cancelled,
}

impl WorkWeekendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::FullyApproved => "fully_approved",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending_approval" => Some(Self::PendingApproval),
            "fully_approved" => Some(Self::FullyApproved),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled maintenance weekend at the shared property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkWeekend {
    pub id: WorkWeekendId,
    pub org_id: OrgId,
    pub title: String,
    pub recipient: String,
    pub start_date: String,
    pub end_date: String,
    pub status: WorkWeekendStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date(" 2026-03-09 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
        );
        assert!(parse_date("09/03/2026").is_err());
        assert!(parse_date("2026-02-30").is_err());
    }

    #[test]
    fn test_usage_counter_override_is_done() {
        let c = UsageCounter {
            group_name: "A".into(),
            rotation_year: 2026,
            primary_used: 3,
            primary_allowed: 1,
            secondary_used: 0,
            secondary_allowed: 1,
        };
        assert!(c.primary_done());
        assert!(c.secondary_remaining());
    }

    #[test]
    fn test_secondary_lifecycle() {
        let org = OrgId::new();
        let mut status = SecondaryPhaseStatus::not_started(org, 2026);
        assert_eq!(status.state(), SecondaryState::NotStarted);
        assert!(status.active_group().is_none());

        status.started_at = Some(Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap());
        status.current_group = Some("B".into());
        assert_eq!(status.state(), SecondaryState::Active("B".into()));
        assert!(status.is_active("B"));
        assert!(!status.is_active("A"));

        status.turn_completed = true;
        assert_eq!(status.state(), SecondaryState::TurnCompleted("B".into()));
        assert!(!status.is_active("B"));
        assert!(status.active_group().is_none());

        status.current_group = None;
        assert_eq!(status.state(), SecondaryState::PhaseDone);
    }

    #[test]
    fn test_turn_deadline_counts_from_start_instant() {
        let mut status = SecondaryPhaseStatus::not_started(OrgId::new(), 2026);
        assert!(status.turn_deadline(7).is_none());

        status.started_at = Some(Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap());
        assert_eq!(
            status.turn_deadline(7),
            Some(Utc.with_ymd_and_hms(2025, 11, 10, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_enum_string_forms() {
        for phase in [PeriodPhase::Primary, PeriodPhase::Secondary] {
            assert_eq!(PeriodPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(
            WorkWeekendStatus::parse("fully_approved"),
            Some(WorkWeekendStatus::FullyApproved)
        );
        assert_eq!(WorkWeekendStatus::parse("approved"), None);
    }
}
