use std::sync::Arc;

use kube::Resource;
use kube::runtime::events::EventType;
use tracing::debug;

use crate::controller::events::EventPublisher;
use crate::controller::state_machine::{TransitionResult, WorkEvent, WorkPhase, WorkStateMachine};
use crate::controller::store::ResourceStore;
use crate::crd::HasConditions;
use crate::health::Metrics;

/// Attempts at a final status write before giving up on conflicts
pub const STATUS_WRITE_ATTEMPTS: usize = 3;

/// Shared context for the backup and restore handlers
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub events: Arc<dyn EventPublisher>,
    pub metrics: Arc<Metrics>,
    pub state_machine: Arc<WorkStateMachine>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            state_machine: Arc::new(WorkStateMachine::new()),
        }
    }

    /// Whether `event` is a legal step from the resource's current phase
    pub fn can_apply<T: HasConditions>(&self, obj: &T, event: WorkEvent) -> bool {
        let phase = WorkPhase::of(obj);
        match self.state_machine.transition(phase, event) {
            TransitionResult::Success { to, .. } => {
                debug!(from = %phase, to = %to, event = %event, "Transition");
                true
            }
            TransitionResult::InvalidTransition { current, event } => {
                debug!(phase = %current, event = %event, "Ignoring invalid transition");
                false
            }
        }
    }

    pub async fn warn<K>(&self, obj: &K, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), EventType::Warning, reason, action, Some(note))
            .await;
    }

    pub async fn normal<K>(&self, obj: &K, reason: &str, action: &str, note: String)
    where
        K: Resource<DynamicType = ()>,
    {
        self.events
            .publish(&obj.object_ref(&()), EventType::Normal, reason, action, Some(note))
            .await;
    }
}
