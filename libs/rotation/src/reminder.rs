//! Reminder derivation.
//!
//! Reminders are computed from snapshots on every pass and never stored
//! here. Each one carries an ID derived from its source record and kind, so
//! a pass never yields the same reminder twice and consecutive passes agree
//! on identity.
//!
//! Date-based reminders (reservations, work weekends, selection periods)
//! fire at a configured time of day on their send date. The secondary-phase
//! deadline is the exception: there is no stored row for a secondary turn,
//! so it is computed from the turn's start timestamp plus the secondary
//! window length.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use rota_id::ReminderId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{
    parse_date, Reservation, SecondaryPhaseStatus, SelectionPeriod, WorkWeekend,
    WorkWeekendStatus,
};

/// Default look-ahead for reminders.
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

/// Record type a reminder was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Reservation,
    SelectionPeriod,
    WorkWeekend,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reservation => "reservation",
            Self::SelectionPeriod => "selection_period",
            Self::WorkWeekend => "work_weekend",
        }
    }
}

/// What a reminder is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReminderKind {
    ReservationUpcoming { days_before: u32 },
    WorkWeekendUpcoming { days_before: u32 },
    SelectionStart,
    SelectionEndingTomorrow,
    SecondaryDeadline,
}

impl ReminderKind {
    /// Stable key used in reminder IDs.
    pub fn key(&self) -> String {
        match self {
            Self::ReservationUpcoming { days_before } => format!("reservation_{days_before}d"),
            Self::WorkWeekendUpcoming { days_before } => format!("work_weekend_{days_before}d"),
            Self::SelectionStart => "selection_start".to_string(),
            Self::SelectionEndingTomorrow => "selection_ending_tomorrow".to_string(),
            Self::SecondaryDeadline => "secondary_deadline".to_string(),
        }
    }
}

/// The dates of the event a reminder points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A computed notification due at `send_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderInstance {
    pub id: ReminderId,
    pub source_type: SourceType,
    pub source_id: String,
    pub kind: ReminderKind,
    pub send_at: DateTime<Utc>,
    pub recipient: String,
    pub group_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub event_window: EventWindow,
}

/// Which of the 7/3/1-day advance reminders are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetToggles {
    pub seven_days: bool,
    pub three_days: bool,
    pub one_day: bool,
}

impl OffsetToggles {
    pub const ALL: Self = Self {
        seven_days: true,
        three_days: true,
        one_day: true,
    };

    pub const NONE: Self = Self {
        seven_days: false,
        three_days: false,
        one_day: false,
    };

    /// Builds toggles from a list of day counts; values other than 7, 3 and 1
    /// are ignored.
    pub fn from_days(days: &[u32]) -> Self {
        Self {
            seven_days: days.contains(&7),
            three_days: days.contains(&3),
            one_day: days.contains(&1),
        }
    }

    /// Enabled offsets, largest first.
    pub fn enabled(&self) -> impl Iterator<Item = u32> {
        [(7, self.seven_days), (3, self.three_days), (1, self.one_day)]
            .into_iter()
            .filter_map(|(days, on)| on.then_some(days))
    }
}

impl Default for OffsetToggles {
    fn default() -> Self {
        Self::ALL
    }
}

/// Per-organization reminder preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub reservation_offsets: OffsetToggles,
    pub work_weekend_offsets: OffsetToggles,
    pub selection_start: bool,
    pub selection_ending: bool,
    pub secondary_deadline: bool,
    pub horizon_days: u32,
    pub secondary_window_days: u32,
    /// Time of day (UTC) at which date-based reminders fire.
    pub send_time: NaiveTime,
    /// Contact per group for selection reminders; the group name is used when absent.
    pub group_recipients: BTreeMap<String, String>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            reservation_offsets: OffsetToggles::ALL,
            work_weekend_offsets: OffsetToggles::ALL,
            selection_start: true,
            selection_ending: true,
            secondary_deadline: true,
            horizon_days: DEFAULT_HORIZON_DAYS,
            secondary_window_days: 7,
            send_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            group_recipients: BTreeMap::new(),
        }
    }
}

impl ReminderSettings {
    fn recipient_for(&self, group: &str) -> String {
        self.group_recipients
            .get(group)
            .cloned()
            .unwrap_or_else(|| group.to_string())
    }

    fn at_send_time(&self, date: NaiveDate) -> DateTime<Utc> {
        date.and_time(self.send_time).and_utc()
    }
}

/// Snapshots the reminder builder reads.
#[derive(Debug, Clone)]
pub struct ReminderInput<'a> {
    pub reservations: &'a [Reservation],
    pub periods: &'a [SelectionPeriod],
    pub secondary: Option<&'a SecondaryPhaseStatus>,
    pub work_weekends: &'a [WorkWeekend],
    /// Groups marked done out-of-band; they get no "turn started" reminder.
    pub completed_groups: &'a BTreeSet<String>,
    /// The single clock reading for this pass.
    pub now: DateTime<Utc>,
}

/// Today plus the last day inside the horizon.
#[derive(Debug, Clone, Copy)]
struct Horizon {
    today: NaiveDate,
    end: NaiveDate,
}

impl Horizon {
    fn new(now: DateTime<Utc>, days: u32) -> Self {
        let today = now.date_naive();
        let end = today
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        Self { today, end }
    }

    fn contains(&self, date: NaiveDate) -> bool {
        self.today <= date && date <= self.end
    }
}

/// Collects reminders keyed by ID; the first instance for an ID wins.
#[derive(Default)]
struct Collector {
    by_id: BTreeMap<ReminderId, ReminderInstance>,
}

impl Collector {
    fn push(&mut self, reminder: ReminderInstance) {
        self.by_id.entry(reminder.id.clone()).or_insert(reminder);
    }

    fn into_sorted(self) -> Vec<ReminderInstance> {
        let mut out: Vec<_> = self.by_id.into_values().collect();
        out.sort_by(|a, b| {
            a.send_at
                .cmp(&b.send_at)
                .then_with(|| a.source_type.cmp(&b.source_type))
                .then_with(|| a.group_name.cmp(&b.group_name))
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }
}

/// Builds the reminder list for one organization, ordered by `send_at`.
///
/// Ties are broken by source type, then group name, then ID, so the output
/// is identical for identical input.
pub fn build(input: &ReminderInput<'_>, settings: &ReminderSettings) -> Vec<ReminderInstance> {
    let horizon = Horizon::new(input.now, settings.horizon_days);
    let mut collector = Collector::default();

    for reservation in input.reservations {
        reservation_reminders(reservation, &horizon, settings, &mut collector);
    }

    for work_weekend in input.work_weekends {
        work_weekend_reminders(work_weekend, &horizon, settings, &mut collector);
    }

    for period in input.periods {
        period_reminders(period, input.completed_groups, &horizon, settings, &mut collector);
    }

    if let Some(status) = input.secondary {
        secondary_reminder(status, &horizon, settings, &mut collector);
    }

    collector.into_sorted()
}

/// Parses an event's date pair, logging and returning `None` when either is bad.
fn event_dates(
    source: SourceType,
    source_id: &str,
    start: &str,
    end: &str,
) -> Option<(NaiveDate, NaiveDate)> {
    match (parse_date(start), parse_date(end)) {
        (Ok(start), Ok(end)) => Some((start, end)),
        (Err(e), _) | (_, Err(e)) => {
            warn!(
                source = source.as_str(),
                source_id,
                error = %e,
                "Skipping event with unparseable date"
            );
            None
        }
    }
}

fn reservation_reminders(
    reservation: &Reservation,
    horizon: &Horizon,
    settings: &ReminderSettings,
    collector: &mut Collector,
) {
    let source_id = reservation.id.to_string();
    let Some((check_in, check_out)) = event_dates(
        SourceType::Reservation,
        &source_id,
        &reservation.check_in,
        &reservation.check_out,
    ) else {
        return;
    };
    if !horizon.contains(check_in) {
        return;
    }

    for days_before in settings.reservation_offsets.enabled() {
        let Some(send_date) = check_in.checked_sub_days(Days::new(u64::from(days_before))) else {
            continue;
        };
        if send_date < horizon.today {
            continue;
        }

        let kind = ReminderKind::ReservationUpcoming { days_before };
        collector.push(ReminderInstance {
            id: ReminderId::derive(&[
                SourceType::Reservation.as_str(),
                source_id.as_str(),
                kind.key().as_str(),
            ]),
            source_type: SourceType::Reservation,
            source_id: source_id.clone(),
            kind,
            send_at: settings.at_send_time(send_date),
            recipient: reservation.recipient.clone(),
            group_name: Some(reservation.group_name.clone()),
            subject: format!("Your stay starts in {}", plural_days(days_before)),
            body: format!(
                "Reminder: {} has a reservation from {check_in} to {check_out}.",
                reservation.group_name
            ),
            event_window: EventWindow {
                start: check_in,
                end: check_out,
            },
        });
    }
}

fn work_weekend_reminders(
    work_weekend: &WorkWeekend,
    horizon: &Horizon,
    settings: &ReminderSettings,
    collector: &mut Collector,
) {
    if work_weekend.status != WorkWeekendStatus::FullyApproved {
        return;
    }

    let source_id = work_weekend.id.to_string();
    let Some((start, end)) = event_dates(
        SourceType::WorkWeekend,
        &source_id,
        &work_weekend.start_date,
        &work_weekend.end_date,
    ) else {
        return;
    };
    if !horizon.contains(start) {
        return;
    }

    for days_before in settings.work_weekend_offsets.enabled() {
        let Some(send_date) = start.checked_sub_days(Days::new(u64::from(days_before))) else {
            continue;
        };
        if send_date < horizon.today {
            continue;
        }

        let kind = ReminderKind::WorkWeekendUpcoming { days_before };
        collector.push(ReminderInstance {
            id: ReminderId::derive(&[
                SourceType::WorkWeekend.as_str(),
                source_id.as_str(),
                kind.key().as_str(),
            ]),
            source_type: SourceType::WorkWeekend,
            source_id: source_id.clone(),
            kind,
            send_at: settings.at_send_time(send_date),
            recipient: work_weekend.recipient.clone(),
            group_name: None,
            subject: format!("{} in {}", work_weekend.title, plural_days(days_before)),
            body: format!(
                "{} runs from {start} to {end}. Thanks for pitching in.",
                work_weekend.title
            ),
            event_window: EventWindow { start, end },
        });
    }
}

fn period_reminders(
    period: &SelectionPeriod,
    completed_groups: &BTreeSet<String>,
    horizon: &Horizon,
    settings: &ReminderSettings,
    collector: &mut Collector,
) {
    if period.completed {
        return;
    }

    let source_id = period.id.to_string();
    let window = EventWindow {
        start: period.start_date,
        end: period.end_date,
    };

    if settings.selection_start
        && horizon.contains(period.start_date)
        && !completed_groups.contains(&period.group_name)
    {
        let kind = ReminderKind::SelectionStart;
        collector.push(ReminderInstance {
            id: ReminderId::derive(&[
                SourceType::SelectionPeriod.as_str(),
                source_id.as_str(),
                kind.key().as_str(),
            ]),
            source_type: SourceType::SelectionPeriod,
            source_id: source_id.clone(),
            kind,
            send_at: settings.at_send_time(period.start_date),
            recipient: settings.recipient_for(&period.group_name),
            group_name: Some(period.group_name.clone()),
            subject: "Your selection turn has started".to_string(),
            body: format!(
                "{} may choose dates for {} from {} through {}.",
                period.group_name, period.rotation_year, period.start_date, period.end_date
            ),
            event_window: window,
        });
    }

    let ending = period.end_date.checked_sub_days(Days::new(1));
    if let Some(send_date) = ending.filter(|d| settings.selection_ending && horizon.contains(*d)) {
        let kind = ReminderKind::SelectionEndingTomorrow;
        collector.push(ReminderInstance {
            id: ReminderId::derive(&[
                SourceType::SelectionPeriod.as_str(),
                source_id.as_str(),
                kind.key().as_str(),
            ]),
            source_type: SourceType::SelectionPeriod,
            source_id,
            kind,
            send_at: settings.at_send_time(send_date),
            recipient: settings.recipient_for(&period.group_name),
            group_name: Some(period.group_name.clone()),
            subject: "Your selection turn ends tomorrow".to_string(),
            body: format!(
                "{}'s selection window closes at the end of {}.",
                period.group_name, period.end_date
            ),
            event_window: window,
        });
    }
}

fn secondary_reminder(
    status: &SecondaryPhaseStatus,
    horizon: &Horizon,
    settings: &ReminderSettings,
    collector: &mut Collector,
) {
    if !settings.secondary_deadline {
        return;
    }
    let (Some(group), Some(started_at)) = (status.active_group(), status.started_at) else {
        return;
    };
    let Some(deadline) = status.turn_deadline(settings.secondary_window_days) else {
        return;
    };

    let send_at = deadline - Duration::days(1);
    if !horizon.contains(send_at.date_naive()) {
        return;
    }

    let source_id = format!("{}:{}", status.org_id, status.rotation_year);
    let started = started_at.to_rfc3339();
    let kind = ReminderKind::SecondaryDeadline;
    collector.push(ReminderInstance {
        id: ReminderId::derive(&[
            SourceType::SelectionPeriod.as_str(),
            source_id.as_str(),
            group,
            started.as_str(),
            kind.key().as_str(),
        ]),
        source_type: SourceType::SelectionPeriod,
        source_id,
        kind,
        send_at,
        recipient: settings.recipient_for(group),
        group_name: Some(group.to_string()),
        subject: "Your secondary selection turn ends tomorrow".to_string(),
        body: format!(
            "{group}'s secondary selection turn ends at {}.",
            deadline.format("%Y-%m-%d %H:%M UTC")
        ),
        event_window: EventWindow {
            start: started_at.date_naive(),
            end: deadline.date_naive(),
        },
    });
}

fn plural_days(days: u32) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{days} days")
    }
}
