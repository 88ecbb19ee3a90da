//! Condition updates for backup and restore resources
//!
//! Writers build the desired condition set locally and only write back to the
//! store when something actually changed.

use chrono::Utc;

use crate::crd::{Condition, ConditionType, HasConditions, condition_status};

/// Set or update a condition in place.
///
/// Returns `true` if anything changed. An existing condition keeps its
/// `last_transition_time` unless its status flips.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let now = Utc::now().to_rfc3339();

    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status
                && existing.reason == new.reason
                && existing.message == new.message
            {
                return false;
            }
            if existing.status != new.status {
                existing.last_transition_time = now;
            }
            existing.status = new.status;
            existing.reason = new.reason;
            existing.message = new.message;
            true
        }
        None => {
            conditions.push(Condition {
                last_transition_time: now,
                ..new
            });
            true
        }
    }
}

/// `Complete=True` or `Failed=True`
pub fn is_terminal<T: HasConditions>(obj: &T) -> bool {
    obj.is_condition_true(ConditionType::Complete) || obj.is_condition_true(ConditionType::Failed)
}

/// `Running=True`
pub fn is_running<T: HasConditions>(obj: &T) -> bool {
    obj.is_condition_true(ConditionType::Running)
}

/// `Scheduled=True`
pub fn is_scheduled<T: HasConditions>(obj: &T) -> bool {
    obj.is_condition_true(ConditionType::Scheduled)
}

/// Builder applying several condition updates and tracking whether any of
/// them changed the resource.
pub struct ConditionBuilder<'a, T: HasConditions> {
    obj: &'a mut T,
    changed: bool,
}

impl<'a, T: HasConditions> ConditionBuilder<'a, T> {
    pub fn new(obj: &'a mut T) -> Self {
        Self {
            obj,
            changed: false,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't
    pub fn set_condition(
        mut self,
        type_: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
    ) -> Self {
        let status = if status {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        let condition = Condition::new(type_, status, reason, message);
        self.changed |= set_condition(self.obj.conditions_mut(), condition);
        self
    }

    pub fn scheduled(self, member: &str) -> Self {
        self.set_condition(
            ConditionType::Scheduled,
            true,
            "Scheduled",
            &format!("scheduled on {}", member),
        )
    }

    pub fn running(self, is_running: bool, reason: &str, message: &str) -> Self {
        self.set_condition(ConditionType::Running, is_running, reason, message)
    }

    pub fn complete(self, message: &str) -> Self {
        self.set_condition(ConditionType::Complete, true, "Complete", message)
    }

    pub fn failed(self, reason: &str, message: &str) -> Self {
        self.set_condition(ConditionType::Failed, true, reason, message)
    }

    /// Whether any update changed the resource
    pub fn changed(self) -> bool {
        self.changed
    }
}
