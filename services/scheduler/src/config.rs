use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use rota_core::reminder::{OffsetToggles, ReminderSettings, DEFAULT_HORIZON_DAYS};

use crate::db::DbConfig;

/// Postgres channel that carries change notifications.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "rota_changes";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    /// Full recompute interval, independent of change notifications.
    pub resync_interval: Duration,
    pub notify_channel: String,
    pub reminders: ReminderDefaults,
}

/// Service-wide reminder preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDefaults {
    pub horizon_days: u32,
    pub send_hour: u32,
    pub offsets: Vec<u32>,
}

impl Default for ReminderDefaults {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            send_hour: 9,
            offsets: vec![7, 3, 1],
        }
    }
}

impl ReminderDefaults {
    /// Settings for one organization; the secondary window comes from its
    /// rotation config.
    pub fn settings(&self, secondary_window_days: u32) -> ReminderSettings {
        let offsets = OffsetToggles::from_days(&self.offsets);
        ReminderSettings {
            reservation_offsets: offsets,
            work_weekend_offsets: offsets,
            horizon_days: self.horizon_days,
            secondary_window_days,
            send_time: NaiveTime::from_hms_opt(self.send_hour, 0, 0)
                .unwrap_or_else(|| ReminderSettings::default().send_time),
            ..ReminderSettings::default()
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("ROTA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("ROTA_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let resync_secs: u64 = match std::env::var("ROTA_RESYNC_SECS") {
            Ok(v) => v.parse().context("ROTA_RESYNC_SECS must be a number of seconds")?,
            Err(_) => 300,
        };

        let notify_channel = std::env::var("ROTA_NOTIFY_CHANNEL")
            .unwrap_or_else(|_| DEFAULT_NOTIFY_CHANNEL.to_string());

        let mut reminders = ReminderDefaults::default();
        if let Ok(v) = std::env::var("ROTA_HORIZON_DAYS") {
            reminders.horizon_days = v.parse().context("ROTA_HORIZON_DAYS must be a number")?;
        }
        if let Ok(v) = std::env::var("ROTA_SEND_HOUR") {
            reminders.send_hour = v.parse().context("ROTA_SEND_HOUR must be 0-23")?;
            anyhow::ensure!(reminders.send_hour < 24, "ROTA_SEND_HOUR must be 0-23");
        }
        if let Ok(v) = std::env::var("ROTA_REMINDER_OFFSETS") {
            reminders.offsets = parse_offsets(&v)?;
        }

        Ok(Self {
            log_level,
            dev_mode,
            database: DbConfig::from_env(),
            resync_interval: Duration::from_secs(resync_secs),
            notify_channel,
            reminders,
        })
    }
}

/// Parses a comma list such as `7,1`. An empty string disables all offsets.
fn parse_offsets(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let days: u32 = s
                .parse()
                .with_context(|| format!("invalid reminder offset '{s}'"))?;
            anyhow::ensure!(
                matches!(days, 7 | 3 | 1),
                "reminder offsets must be 7, 3 or 1, got {days}"
            );
            Ok(days)
        })
        .collect()
}
