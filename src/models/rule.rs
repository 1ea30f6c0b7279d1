use chrono::Weekday;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// A mentor's recurring weekly availability template.
///
/// `week_day` runs 1 (Monday) to 7 (Sunday). Minutes are minutes of the day
/// in UTC. `price` is in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    pub id: Uuid,
    pub mentor_id: String,
    pub week_day: u8,
    pub start_minute: u32,
    pub end_minute: u32,
    pub slot_duration_minutes: u32,
    pub price: i64,
    pub is_active: bool,
    /// Bumped on every edit. Slots remember the revision they came from.
    pub revision: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub week_day: u8,
    pub start_minute: u32,
    pub end_minute: u32,
    pub slot_duration_minutes: u32,
    pub price: i64,
}

/// Partial update of a rule. `invalidate_future_slots` cancels the rule's
/// future OPEN slots so the next generation pass re-creates them from the
/// edited shape.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub week_day: Option<u8>,
    pub start_minute: Option<u32>,
    pub end_minute: Option<u32>,
    pub slot_duration_minutes: Option<u32>,
    pub price: Option<i64>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub invalidate_future_slots: bool,
}

impl RecurringRule {
    pub fn new(mentor_id: &str, input: NewRule) -> Result<Self> {
        let rule = Self {
            id: Uuid::new_v4(),
            mentor_id: mentor_id.to_string(),
            week_day: input.week_day,
            start_minute: input.start_minute,
            end_minute: input.end_minute,
            slot_duration_minutes: input.slot_duration_minutes,
            price: input.price,
            is_active: true,
            revision: 1,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mentor_id.trim().is_empty() {
            return Err(EngineError::Validation("mentor id is required".into()));
        }
        if !(1..=7).contains(&self.week_day) {
            return Err(EngineError::Validation(format!(
                "week day must be between 1 and 7, got {}",
                self.week_day
            )));
        }
        if self.start_minute >= self.end_minute {
            return Err(EngineError::Validation(
                "start minute must be before end minute".into(),
            ));
        }
        if self.end_minute > MINUTES_PER_DAY {
            return Err(EngineError::Validation(format!(
                "end minute must not exceed {}",
                MINUTES_PER_DAY
            )));
        }
        if self.slot_duration_minutes == 0 {
            return Err(EngineError::Validation(
                "slot duration must be positive".into(),
            ));
        }
        if (self.end_minute - self.start_minute) % self.slot_duration_minutes != 0 {
            return Err(EngineError::Validation(format!(
                "window of {} minutes is not a multiple of the {}-minute slot duration",
                self.end_minute - self.start_minute,
                self.slot_duration_minutes
            )));
        }
        if self.price < 0 {
            return Err(EngineError::Validation("price must not be negative".into()));
        }
        Ok(())
    }

    /// Apply a partial update and re-validate the result.
    pub fn apply(&mut self, update: &RuleUpdate) -> Result<()> {
        let mut next = self.clone();
        if let Some(week_day) = update.week_day {
            next.week_day = week_day;
        }
        if let Some(start) = update.start_minute {
            next.start_minute = start;
        }
        if let Some(end) = update.end_minute {
            next.end_minute = end;
        }
        if let Some(duration) = update.slot_duration_minutes {
            next.slot_duration_minutes = duration;
        }
        if let Some(price) = update.price {
            next.price = price;
        }
        if let Some(active) = update.is_active {
            next.is_active = active;
        }
        next.validate()?;
        next.revision += 1;
        *self = next;
        Ok(())
    }

    pub fn weekday(&self) -> Weekday {
        match self.week_day {
            1 => Weekday::Mon,
            2 => Weekday::Tue,
            3 => Weekday::Wed,
            4 => Weekday::Thu,
            5 => Weekday::Fri,
            6 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }

    /// Whether two rules of the same mentor claim overlapping minutes of the
    /// same weekday.
    pub fn overlaps(&self, other: &RecurringRule) -> bool {
        self.mentor_id == other.mentor_id
            && self.week_day == other.week_day
            && self.start_minute < other.end_minute
            && other.start_minute < self.end_minute
    }
}
