//! Rotation phase tracking.
//!
//! The primary phase runs until every group in the order has used its
//! primary allotment. Who is active right now comes from an external
//! pointer; usage counters only decide who is skipped in the queue and when
//! the phase flips, because finishing a turn is an explicit user action that
//! the counters cannot reliably reflect.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{
    ActivePointer, PeriodPhase, SecondaryPhaseStatus, SecondaryState, SelectionPeriod,
    UsageCounter,
};
use crate::period::{generate_secondary, next_day, window_end, ScheduledTurn};

/// Where the rotation stands for one organization and year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    Primary,
    /// Every group is done with primary turns; nobody has started secondary.
    SecondaryNotStarted,
    Secondary,
    Complete,
}

/// Everything the tracker needs, fetched by the caller.
#[derive(Debug, Clone)]
pub struct PhaseInput<'a> {
    /// Resolved turn order for the rotation year.
    pub order: &'a [String],
    pub usage: &'a [UsageCounter],
    pub periods: &'a [SelectionPeriod],
    pub pointer: &'a ActivePointer,
    pub secondary: Option<&'a SecondaryPhaseStatus>,
    pub primary_window_days: u32,
    pub secondary_window_days: u32,
    pub secondary_max_periods: u32,
    pub today: NaiveDate,
}

/// Window shown next to the active group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Human-facing summary of the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub headline: String,
    pub active_window: Option<ActiveWindow>,
    pub secondary_state: Option<SecondaryState>,
}

/// Result of [`compute_active`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase: RotationPhase,
    pub active_group: Option<String>,
    pub display: DisplayInfo,
    pub upcoming: Vec<ScheduledTurn>,
}

/// Determines the phase, the active group, and the queue of upcoming turns.
pub fn compute_active(input: &PhaseInput<'_>) -> PhaseSnapshot {
    if input.order.is_empty() {
        return PhaseSnapshot {
            phase: RotationPhase::Primary,
            active_group: None,
            display: DisplayInfo {
                headline: "no rotation configured".to_string(),
                active_window: None,
                secondary_state: None,
            },
            upcoming: Vec::new(),
        };
    }

    let counters = index_counters(input.order, input.usage);
    let primary_done = |group: &str| counters.get(group).is_some_and(|c| c.primary_done());

    if input.order.iter().all(|g| primary_done(g)) {
        secondary_snapshot(input, &counters)
    } else {
        primary_snapshot(input, &primary_done)
    }
}

/// Maps counters by group, dropping those for groups not in the order.
fn index_counters<'a>(
    order: &[String],
    usage: &'a [UsageCounter],
) -> HashMap<&'a str, &'a UsageCounter> {
    let mut map = HashMap::with_capacity(usage.len());
    for counter in usage {
        if order.iter().any(|g| *g == counter.group_name) {
            map.insert(counter.group_name.as_str(), counter);
        } else {
            warn!(
                group = %counter.group_name,
                rotation_year = counter.rotation_year,
                "Usage counter references a group outside the rotation order; skipping"
            );
        }
    }
    map
}

fn primary_snapshot(input: &PhaseInput<'_>, primary_done: &dyn Fn(&str) -> bool) -> PhaseSnapshot {
    let rows: HashMap<&str, &SelectionPeriod> = input
        .periods
        .iter()
        .filter(|p| p.phase == PeriodPhase::Primary)
        .map(|p| (p.group_name.as_str(), p))
        .collect();

    let active_index = input.pointer.group_name.as_deref().and_then(|g| {
        let index = input.order.iter().position(|o| o == g);
        if index.is_none() {
            warn!(group = g, "Active pointer names a group outside the rotation order");
        }
        index
    });
    let active_group = active_index.map(|i| input.order[i].clone());
    let start_index = active_index.map_or(0, |i| i + 1);

    let mut upcoming = Vec::new();
    let mut last_end: Option<NaiveDate> = None;

    for (index, group) in input.order.iter().enumerate() {
        let turn = match rows.get(group.as_str()) {
            Some(period) => ScheduledTurn::from(*period),
            None => {
                let Some(turn) = fallback_turn(group, index, last_end, input) else {
                    continue;
                };
                if index >= start_index {
                    debug!(group = %group, "No stored period; computed dates sequentially");
                }
                turn
            }
        };
        last_end = Some(turn.end_date);

        if index >= start_index && !primary_done(group) {
            upcoming.push(turn);
        }
    }

    let active_window = active_group
        .as_deref()
        .and_then(|g| rows.get(g))
        .map(|p| ActiveWindow {
            start: p.start_date,
            end: p.end_date,
        });

    let headline = match &active_group {
        Some(g) => format!("{g} is selecting"),
        None => "waiting for the first turn".to_string(),
    };

    PhaseSnapshot {
        phase: RotationPhase::Primary,
        active_group,
        display: DisplayInfo {
            headline,
            active_window,
            secondary_state: None,
        },
        upcoming,
    }
}

/// Dates for a group with no stored row, continuing after `last_end`.
fn fallback_turn(
    group: &str,
    index: usize,
    last_end: Option<NaiveDate>,
    input: &PhaseInput<'_>,
) -> Option<ScheduledTurn> {
    if input.primary_window_days == 0 {
        return None;
    }
    let start = match last_end {
        Some(end) => next_day(end)?,
        None => input.today,
    };
    let end = window_end(start, input.primary_window_days)?;
    Some(ScheduledTurn {
        group_name: group.to_string(),
        phase: PeriodPhase::Primary,
        sequence_index: index as u32,
        start_date: start,
        end_date: end,
        persisted: false,
    })
}

fn secondary_snapshot(
    input: &PhaseInput<'_>,
    counters: &HashMap<&str, &UsageCounter>,
) -> PhaseSnapshot {
    let state = input
        .secondary
        .map_or(SecondaryState::NotStarted, SecondaryPhaseStatus::state);

    let any_remaining = input.order.iter().any(|g| {
        counters
            .get(g.as_str())
            .is_some_and(|c| c.secondary_remaining())
    });

    let (phase, active_group, headline) = match &state {
        SecondaryState::NotStarted => (
            RotationPhase::SecondaryNotStarted,
            None,
            "primary complete, secondary not started".to_string(),
        ),
        SecondaryState::Active(g) => (
            RotationPhase::Secondary,
            Some(g.clone()),
            format!("{g} is selecting (secondary)"),
        ),
        SecondaryState::TurnCompleted(g) if any_remaining => (
            RotationPhase::Secondary,
            None,
            format!("{g} finished; waiting for the next secondary turn"),
        ),
        SecondaryState::TurnCompleted(_) | SecondaryState::PhaseDone => (
            RotationPhase::Complete,
            None,
            "rotation complete".to_string(),
        ),
    };

    let upcoming = if phase == RotationPhase::Complete {
        Vec::new()
    } else {
        secondary_queue(input)
    };

    let active_window = input.secondary.and_then(|status| {
        active_group.as_ref()?;
        let deadline = status.turn_deadline(input.secondary_window_days)?;
        Some(ActiveWindow {
            start: status.started_at?.date_naive(),
            end: deadline.date_naive(),
        })
    });

    PhaseSnapshot {
        phase,
        active_group,
        display: DisplayInfo {
            headline,
            active_window,
            secondary_state: Some(state),
        },
        upcoming,
    }
}

/// Stored secondary rows when there are any, otherwise a live layout.
fn secondary_queue(input: &PhaseInput<'_>) -> Vec<ScheduledTurn> {
    let mut stored: Vec<&SelectionPeriod> = input
        .periods
        .iter()
        .filter(|p| p.phase == PeriodPhase::Secondary)
        .collect();

    if stored.is_empty() {
        return generate_secondary(
            input.order,
            input.usage,
            input.secondary,
            input.secondary_window_days,
            input.secondary_max_periods,
            input.today,
        );
    }

    stored.sort_by_key(|p| p.sequence_index);
    stored
        .into_iter()
        .filter(|p| !p.completed && p.end_date >= input.today)
        .map(ScheduledTurn::from)
        .collect()
}
