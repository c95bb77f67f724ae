//! The pre-open issuance window.
//!
//! Before the gate opens, a short window lets large orders in restricted
//! regions reserve tickets early. The window is `[start - offset, start)` in
//! local time and may begin on the previous calendar day (e.g. a `00:05`
//! gate with a ten minute offset opens at `23:55`).

use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};

use crate::config::{ConfigError, PreOpenConfig, ENV_PREOPEN_OFFSET_MINUTES};

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct PreOpenWindow {
    start: NaiveTime,
    length: TimeDelta,
    utc_offset: FixedOffset,
    min_size_gram: f64,
    region: String,
}

impl PreOpenWindow {
    pub fn from_config(cfg: &PreOpenConfig) -> Result<Self, ConfigError> {
        let start = cfg.gate_start_time()?;
        let utc_offset = FixedOffset::east_opt(cfg.utc_offset_minutes.saturating_mul(60)).ok_or(
            ConfigError::Invalid {
                key: "utc_offset_minutes",
                reason: format!("{} is out of range", cfg.utc_offset_minutes),
            },
        )?;
        if cfg.offset_minutes >= MINUTES_PER_DAY {
            return Err(ConfigError::invalid(ENV_PREOPEN_OFFSET_MINUTES, "must be shorter than a day"));
        }
        Ok(Self {
            start,
            length: TimeDelta::minutes(i64::from(cfg.offset_minutes)),
            utc_offset,
            min_size_gram: cfg.min_size_gram,
            region: cfg.region.clone(),
        })
    }

    /// Whether `now` falls inside the window before today's or tomorrow's gate.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.utc_offset).naive_local();
        let today = local.date();
        [Some(today), today.succ_opt()]
            .into_iter()
            .flatten()
            .map(|day| day.and_time(self.start))
            .any(|gate| gate - self.length <= local && local < gate)
    }

    pub fn min_size_gram(&self) -> f64 {
        self.min_size_gram
    }

    pub fn admits_size(&self, size_gram: f64) -> bool {
        size_gram >= self.min_size_gram
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn admits_region(&self, region: &str) -> bool {
        region.trim().eq_ignore_ascii_case(&self.region)
    }
}

impl Default for PreOpenWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(7, 0, 0).expect("07:00 is a valid time"),
            length: TimeDelta::minutes(10),
            utc_offset: FixedOffset::east_opt(7 * 3600).expect("UTC+7 is a valid offset"),
            min_size_gram: 5.0,
            region: "jabodetabek".to_string(),
        }
    }
}
