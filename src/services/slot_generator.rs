use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::models::rule::RecurringRule;
use crate::models::slot::{Slot, SlotStatus};
use crate::services::database::{DatabaseService, Tables};

/// Start instants a rule produces on the dates in `[from, to]`.
pub fn expand_rule(rule: &RecurringRule, from: NaiveDate, to: NaiveDate) -> Vec<DateTime<Utc>> {
    let step = rule.slot_duration_minutes.max(1);
    let mut starts = Vec::new();

    for date in from.iter_days().take_while(|d| *d <= to) {
        if date.weekday() != rule.weekday() {
            continue;
        }
        let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let mut minute = rule.start_minute;
        while minute + rule.slot_duration_minutes <= rule.end_minute {
            starts.push(midnight + Duration::minutes(minute as i64));
            minute += step;
        }
    }

    starts
}

/// Expands active rules into dated slots inside the rolling horizon.
pub struct SlotGenerator {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
    horizon_days: i64,
}

impl SlotGenerator {
    pub fn new(db: Arc<DatabaseService>, clock: Arc<dyn Clock>, horizon_days: i64) -> Self {
        Self {
            db,
            clock,
            horizon_days,
        }
    }

    /// Generate the mentor's slots for dates in `[from, to]`, capped at the
    /// horizon. Safe to re-run: returns only the slots it created.
    pub fn generate(&self, mentor_id: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<Slot>> {
        let now = self.clock.now();
        let to = to.min(now.date_naive() + Duration::days(self.horizon_days));
        let from = from.max(now.date_naive());
        if from > to {
            debug!("Nothing to generate for {} between {} and {}", mentor_id, from, to);
            return Ok(Vec::new());
        }

        let created = self.db.write(|tables| {
            let rules: Vec<RecurringRule> = tables
                .rules
                .iter()
                .filter(|r| r.mentor_id == mentor_id && r.is_active)
                .cloned()
                .collect();

            let mut created = Vec::new();
            for rule in &rules {
                for start_at in expand_rule(rule, from, to) {
                    if start_at <= now {
                        continue;
                    }
                    let slot = Slot::from_rule(rule, start_at);
                    if should_skip(tables, rule, &slot) {
                        continue;
                    }
                    tables.slots.push(slot.clone());
                    created.push(slot);
                }
            }
            Ok(created)
        })?;

        if !created.is_empty() {
            info!(
                "Generated {} slots for mentor {} between {} and {}",
                created.len(),
                mentor_id,
                from,
                to
            );
        }
        Ok(created)
    }

    /// Top up every mentor with an active rule to the full horizon.
    pub fn generate_all(&self) -> Result<usize> {
        let mentors: BTreeSet<String> = self.db.read(|tables| {
            tables
                .rules
                .iter()
                .filter(|r| r.is_active)
                .map(|r| r.mentor_id.clone())
                .collect()
        })?;

        let today = self.clock.now().date_naive();
        let horizon_end = today + Duration::days(self.horizon_days);
        let mut total = 0;
        for mentor_id in &mentors {
            total += self.generate(mentor_id, today, horizon_end)?.len();
        }
        Ok(total)
    }
}

// A candidate is skipped when it overlaps a live slot, or when the mentor
// already cancelled the same occurrence of the same rule revision.
fn should_skip(tables: &Tables, rule: &RecurringRule, candidate: &Slot) -> bool {
    if tables
        .overlapping_live_slot(&candidate.mentor_id, candidate.start_at, candidate.end_at)
        .is_some()
    {
        return true;
    }

    tables.slots.iter().any(|s| {
        s.status == SlotStatus::Cancelled
            && s.rule_id == Some(rule.id)
            && s.rule_revision == Some(rule.revision)
            && s.start_at == candidate.start_at
    })
}
