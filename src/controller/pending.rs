//! Outcomes of finished work whose final status write has not landed yet
//!
//! An agent records the outcome as soon as the executor returns. If the
//! terminal status write then fails, the next sync of the same object finds
//! the outcome here and writes it instead of leaving the object `Running`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::controller::watch::ObjectKey;

struct Pending<T> {
    uid: Option<String>,
    outcome: T,
}

pub struct PendingOutcomes<T> {
    entries: Mutex<HashMap<ObjectKey, Pending<T>>>,
}

impl<T> Default for PendingOutcomes<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> PendingOutcomes<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectKey, Pending<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, key: &ObjectKey, uid: Option<String>, outcome: T) {
        self.lock().insert(key.clone(), Pending { uid, outcome });
    }

    /// Outcome recorded for `key`. An entry left by an object that was
    /// deleted and recreated under the same name is discarded.
    pub fn get(&self, key: &ObjectKey, uid: Option<&str>) -> Option<T> {
        let mut entries = self.lock();
        let stale = entries.get(key)?.uid.as_deref() != uid;
        if stale {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|p| p.outcome.clone())
    }

    pub fn clear(&self, key: &ObjectKey) {
        self.lock().remove(key);
    }
}
