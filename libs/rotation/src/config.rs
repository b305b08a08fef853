//! Per-organization rotation configuration.

use std::collections::HashSet;

use rota_id::OrgId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::order::resolve_for_year;

/// How the turn order moves from one year to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    /// Last year's first group goes to the back.
    #[default]
    MoveFirstToLast,
    /// Last year's final group goes to the front.
    MoveLastToFirst,
}

impl DirectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoveFirstToLast => "move_first_to_last",
            Self::MoveLastToFirst => "move_last_to_first",
        }
    }

    /// Parses both the snake_case form and the older camelCase spelling.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "move_first_to_last" | "moveFirstToLast" => Ok(Self::MoveFirstToLast),
            "move_last_to_first" | "moveLastToFirst" => Ok(Self::MoveLastToFirst),
            other => Err(ConfigError::UnknownDirection(other.to_string())),
        }
    }
}

impl std::fmt::Display for DirectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an organization hands out selection turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Turn order rotates every year according to the direction policy.
    #[default]
    RotatingSelection,
    /// Every group keeps the same slot every year.
    StaticWeeks,
    /// Turns are assigned by hand; no periods are generated.
    Manual,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RotatingSelection => "rotating_selection",
            Self::StaticWeeks => "static_weeks",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rotating_selection" => Some(Self::RotatingSelection),
            "static_weeks" => Some(Self::StaticWeeks),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Maps a legacy in-array sentinel to the mode it used to signal.
    fn from_sentinel(s: &str) -> Option<Self> {
        match s {
            "__rotating__" => Some(Self::RotatingSelection),
            "__static_weeks__" => Some(Self::StaticWeeks),
            "__manual__" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Returns true for legacy mode flags stored inside order arrays.
///
/// Sentinels are wrapped in double underscores (`__manual__`). Group names
/// never are.
pub fn is_sentinel(value: &str) -> bool {
    value.len() > 4 && value.starts_with("__") && value.ends_with("__")
}

/// Rotation settings for one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    pub org_id: OrgId,
    /// Year in which `base_order` applies unrotated.
    pub base_year: i32,
    pub base_order: Vec<String>,
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default)]
    pub direction: DirectionPolicy,
    pub primary_window_days: u32,
    pub secondary_window_days: u32,
    pub secondary_max_periods: u32,
    /// Month (1-12) in which primary selection starts.
    pub start_month: u32,
}

impl RotationConfig {
    /// Builds a config from a legacy order array that may carry mode sentinels.
    ///
    /// The last recognized sentinel wins; unrecognized `__x__` values are
    /// dropped without changing the mode.
    #[allow(clippy::too_many_arguments)]
    pub fn from_legacy_order(
        org_id: OrgId,
        base_year: i32,
        raw_order: &[String],
        direction: DirectionPolicy,
        primary_window_days: u32,
        secondary_window_days: u32,
        secondary_max_periods: u32,
        start_month: u32,
    ) -> Self {
        let mut mode = SelectionMode::default();
        let mut base_order = Vec::with_capacity(raw_order.len());

        for value in raw_order {
            if is_sentinel(value) {
                if let Some(m) = SelectionMode::from_sentinel(value) {
                    mode = m;
                }
            } else {
                base_order.push(value.clone());
            }
        }

        Self {
            org_id,
            base_year,
            base_order,
            mode,
            direction,
            primary_window_days,
            secondary_window_days,
            secondary_max_periods,
            start_month,
        }
    }

    /// Checks the config for values the generators would silently ignore.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=12).contains(&self.start_month) {
            return Err(ConfigError::InvalidStartMonth(self.start_month));
        }
        if self.primary_window_days == 0 {
            return Err(ConfigError::EmptyWindow {
                field: "primary_window_days",
            });
        }
        if self.secondary_window_days == 0 {
            return Err(ConfigError::EmptyWindow {
                field: "secondary_window_days",
            });
        }

        let mut seen = HashSet::new();
        for group in &self.base_order {
            if !seen.insert(group.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.clone()));
            }
        }

        Ok(())
    }

    /// The order that applies to `target_year` under this config's mode.
    pub fn effective_order(&self, target_year: i32) -> Vec<String> {
        match self.mode {
            SelectionMode::RotatingSelection => resolve_for_year(
                &self.base_order,
                self.base_year,
                target_year,
                self.direction,
            ),
            SelectionMode::StaticWeeks => self
                .base_order
                .iter()
                .filter(|g| !is_sentinel(g))
                .cloned()
                .collect(),
            SelectionMode::Manual => Vec::new(),
        }
    }
}
