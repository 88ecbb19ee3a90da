//! Named lifecycle conditions shared by MySQLBackup and MySQLRestore
//!
//! A resource carries at most one condition per [`ConditionType`]. The list is
//! kept as an ordered `Vec` and searched linearly: there are only four types,
//! and keeping insertion order matches how `kubectl` renders conditions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Lifecycle phases tracked as conditions
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// A member has been picked to run the work
    Scheduled,
    /// The assigned member is executing the work
    Running,
    /// The work finished successfully
    Complete,
    /// The work failed permanently
    Failed,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Scheduled => write!(f, "Scheduled"),
            ConditionType::Running => write!(f, "Running"),
            ConditionType::Complete => write!(f, "Complete"),
            ConditionType::Failed => write!(f, "Failed"),
        }
    }
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned (RFC 3339)
    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(type_: ConditionType, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_,
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: String::new(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == condition_status::TRUE
    }
}

/// Access to the condition list of a resource status.
///
/// Implemented by both backup and restore statuses so the scheduler,
/// event filters and handlers can treat them uniformly.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Find a condition by type
    fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Whether the given condition is present with status True
    fn is_condition_true(&self, type_: ConditionType) -> bool {
        self.condition(type_).is_some_and(Condition::is_true)
    }
}
