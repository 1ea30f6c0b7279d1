use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::models::rule::{NewRule, RecurringRule, RuleUpdate};
use crate::services::database::{DatabaseService, Tables};
use crate::services::slot_store::cancel_future_open_slots;

/// Outcome of a rule edit or delete.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChange {
    pub rule: RecurringRule,
    /// Future OPEN slots cancelled as part of the change
    pub cancelled_slots: usize,
    /// The rule was removed rather than disabled
    pub deleted: bool,
}

/// Persists recurring weekly availability rules.
pub struct RuleStore {
    db: Arc<DatabaseService>,
    clock: Arc<dyn Clock>,
}

impl RuleStore {
    pub fn new(db: Arc<DatabaseService>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn list(&self, mentor_id: &str) -> Result<Vec<RecurringRule>> {
        self.db.read(|tables| {
            let mut rules: Vec<RecurringRule> = tables
                .rules
                .iter()
                .filter(|r| r.mentor_id == mentor_id)
                .cloned()
                .collect();
            rules.sort_by_key(|r| (r.week_day, r.start_minute));
            rules
        })
    }

    pub fn create(&self, mentor_id: &str, input: NewRule) -> Result<RecurringRule> {
        let rule = RecurringRule::new(mentor_id, input)?;

        self.db.write(|tables| {
            ensure_no_overlap(tables, &rule)?;
            tables.rules.push(rule.clone());
            Ok(())
        })?;

        info!(
            "Created rule {} for mentor {} (day {}, {}-{}, {}m slots)",
            rule.id,
            rule.mentor_id,
            rule.week_day,
            rule.start_minute,
            rule.end_minute,
            rule.slot_duration_minutes
        );
        Ok(rule)
    }

    /// Edit a rule. Existing slots are only touched when the mentor asks for
    /// future unbooked slots to be invalidated; BOOKED slots never change.
    pub fn update(&self, rule_id: Uuid, actor_id: &str, update: RuleUpdate) -> Result<RuleChange> {
        let now = self.clock.now();

        let change = self.db.write(|tables| {
            let rule = tables.rule_mut(rule_id)?;
            ensure_owner(rule, actor_id)?;
            rule.apply(&update)?;
            let rule = rule.clone();

            if rule.is_active {
                ensure_no_overlap(tables, &rule)?;
            }

            let cancelled_slots = if update.invalidate_future_slots {
                cancel_future_open_slots(tables, rule_id, now)
            } else {
                0
            };

            Ok(RuleChange {
                rule,
                cancelled_slots,
                deleted: false,
            })
        })?;

        info!(
            "Updated rule {} (active: {}, cancelled {} future slots)",
            rule_id, change.rule.is_active, change.cancelled_slots
        );
        Ok(change)
    }

    /// Soft-disable a rule, or remove it together with its future unbooked
    /// slots when `delete_slots` is set.
    pub fn delete(&self, rule_id: Uuid, actor_id: &str, delete_slots: bool) -> Result<RuleChange> {
        let now = self.clock.now();

        let change = self.db.write(|tables| {
            let rule = tables.rule_mut(rule_id)?;
            ensure_owner(rule, actor_id)?;

            if !delete_slots {
                rule.is_active = false;
                return Ok(RuleChange {
                    rule: rule.clone(),
                    cancelled_slots: 0,
                    deleted: false,
                });
            }

            let mut removed = rule.clone();
            removed.is_active = false;
            tables.rules.retain(|r| r.id != rule_id);
            let cancelled_slots = cancel_future_open_slots(tables, rule_id, now);

            Ok(RuleChange {
                rule: removed,
                cancelled_slots,
                deleted: true,
            })
        })?;

        if change.deleted {
            info!(
                "Deleted rule {} and cancelled {} future slots",
                rule_id, change.cancelled_slots
            );
        } else {
            info!("Disabled rule {}", rule_id);
        }
        Ok(change)
    }
}

fn ensure_owner(rule: &RecurringRule, actor_id: &str) -> Result<()> {
    if rule.mentor_id != actor_id {
        warn!("User {} tried to modify rule {} of {}", actor_id, rule.id, rule.mentor_id);
        return Err(EngineError::Policy(
            "only the owning mentor can change this rule".into(),
        ));
    }
    Ok(())
}

fn ensure_no_overlap(tables: &Tables, rule: &RecurringRule) -> Result<()> {
    let clash = tables
        .rules
        .iter()
        .find(|other| other.id != rule.id && other.is_active && other.overlaps(rule));

    match clash {
        Some(other) => Err(EngineError::Validation(format!(
            "rule overlaps active rule {} on the same day",
            other.id
        ))),
        None => Ok(()),
    }
}
