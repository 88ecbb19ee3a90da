//! Lifecycle of backup and restore resources
//!
//! The persisted state is the set of named conditions. [`WorkPhase`] folds
//! those conditions into a single phase so handlers can check that a write
//! they are about to make is a legal step before issuing it.

use std::fmt;

use crate::crd::{ConditionType, HasConditions};

/// Lifecycle phase derived from conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkPhase {
    /// No conditions set yet
    New,
    Scheduled,
    Running,
    Complete,
    Failed,
}

impl WorkPhase {
    /// Fold a resource's conditions into a phase.
    ///
    /// Terminal conditions win over in-flight ones, which win over
    /// `Scheduled`.
    pub fn of<T: HasConditions>(obj: &T) -> Self {
        if obj.is_condition_true(ConditionType::Failed) {
            WorkPhase::Failed
        } else if obj.is_condition_true(ConditionType::Complete) {
            WorkPhase::Complete
        } else if obj.is_condition_true(ConditionType::Running) {
            WorkPhase::Running
        } else if obj.is_condition_true(ConditionType::Scheduled) {
            WorkPhase::Scheduled
        } else {
            WorkPhase::New
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkPhase::Complete | WorkPhase::Failed)
    }
}

impl fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkPhase::New => write!(f, "New"),
            WorkPhase::Scheduled => write!(f, "Scheduled"),
            WorkPhase::Running => write!(f, "Running"),
            WorkPhase::Complete => write!(f, "Complete"),
            WorkPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that move a resource between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkEvent {
    /// The operator assigned the work to a member
    MemberAssigned,
    /// Spec or references failed validation
    ValidationFailed,
    /// The assigned member started executing
    ExecutionStarted,
    /// Execution finished successfully
    ExecutionSucceeded,
    /// Executor or storage failed
    ExecutionFailed,
}

impl fmt::Display for WorkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkEvent::MemberAssigned => write!(f, "MemberAssigned"),
            WorkEvent::ValidationFailed => write!(f, "ValidationFailed"),
            WorkEvent::ExecutionStarted => write!(f, "ExecutionStarted"),
            WorkEvent::ExecutionSucceeded => write!(f, "ExecutionSucceeded"),
            WorkEvent::ExecutionFailed => write!(f, "ExecutionFailed"),
        }
    }
}

#[derive(Debug)]
struct Transition {
    from: WorkPhase,
    to: WorkPhase,
    event: WorkEvent,
    description: &'static str,
}

impl Transition {
    const fn new(
        from: WorkPhase,
        to: WorkPhase,
        event: WorkEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: WorkPhase,
        to: WorkPhase,
        event: WorkEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: WorkPhase,
        event: WorkEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success { .. })
    }
}

/// Transition table shared by backups and restores
pub struct WorkStateMachine {
    transitions: Vec<Transition>,
}

impl Default for WorkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                Transition::new(
                    WorkPhase::New,
                    WorkPhase::Scheduled,
                    WorkEvent::MemberAssigned,
                    "Work assigned to a cluster member",
                ),
                Transition::new(
                    WorkPhase::New,
                    WorkPhase::Failed,
                    WorkEvent::ValidationFailed,
                    "Spec rejected before scheduling",
                ),
                Transition::new(
                    WorkPhase::Scheduled,
                    WorkPhase::Running,
                    WorkEvent::ExecutionStarted,
                    "Assigned member started the work",
                ),
                Transition::new(
                    WorkPhase::Scheduled,
                    WorkPhase::Failed,
                    WorkEvent::ExecutionFailed,
                    "Work could not be started",
                ),
                Transition::new(
                    WorkPhase::Running,
                    WorkPhase::Complete,
                    WorkEvent::ExecutionSucceeded,
                    "Work finished",
                ),
                Transition::new(
                    WorkPhase::Running,
                    WorkPhase::Failed,
                    WorkEvent::ExecutionFailed,
                    "Work failed while running",
                ),
            ],
        }
    }

    pub fn transition(&self, current: WorkPhase, event: WorkEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: WorkPhase, event: WorkEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// All events accepted in `state`
    pub fn valid_events(&self, state: WorkPhase) -> Vec<WorkEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}
