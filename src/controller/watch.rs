//! Object keys and watch event filters
//!
//! The engine passes every watched object through its kind's filter before
//! syncing it; handlers always re-read the object from the store by key
//! before mutating it.

use std::fmt;
use std::sync::Arc;

use kube::{Resource, ResourceExt};

use crate::controller::status::{is_running, is_scheduled, is_terminal};
use crate::crd::ScheduledWork;

/// Namespaced name of a watched resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Predicate deciding whether a watched object should be synced
pub type EventFilter<K> = Arc<dyn Fn(&K) -> bool + Send + Sync>;

/// Operator-side filter: skip finished and in-flight work
pub fn operator_filter<K: ScheduledWork>() -> EventFilter<K> {
    Arc::new(|obj: &K| !is_terminal(obj) && !is_running(obj))
}

/// Agent-side filter: additionally require the work to be scheduled onto
/// `hostname`
pub fn agent_filter<K: ScheduledWork>(hostname: String) -> EventFilter<K> {
    Arc::new(move |obj: &K| {
        !is_terminal(obj)
            && !is_running(obj)
            && is_scheduled(obj)
            && obj.scheduled_member() == Some(hostname.as_str())
    })
}

/// Key of a namespaced object
pub fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}
