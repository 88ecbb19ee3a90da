//! Generic level-triggered reconciler
//!
//! One [`Engine`] drives one resource kind on a `kube::runtime::Controller`,
//! which gives per-object deduplication, at most one in-flight sync per
//! object and bounded concurrency. The engine adds the kind's event filter,
//! hands each object's key to its [`SyncHandler`] and owns the retry policy.
//! The same engine runs the backup and restore controllers on both the
//! operator and the agent; only the handler and the event filter differ.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::watch::{EventFilter, ObjectKey, object_key};
use crate::health::Metrics;

/// Keys are dropped after this many consecutive failed syncs
pub const DEFAULT_MAX_RETRIES: u32 = 15;

/// How long `run` waits for the watch cache before giving up
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Reconciles one key. Errors are retried by the engine.
#[async_trait]
pub trait SyncHandler: Send + Sync + 'static {
    async fn sync(&self, key: &ObjectKey) -> Result<()>;
}

/// Consecutive failure counts per key, driving the controller's error policy
pub struct RetryPolicy {
    backoff: BackoffConfig,
    max_retries: u32,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig, max_retries: u32) -> Self {
        Self {
            backoff,
            max_retries,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.lock().remove(key);
    }

    /// Decide what happens to `key` after its sync returned `err`.
    ///
    /// Retryable errors are requeued with exponential backoff until
    /// `max_retries` retries have failed; after that, or for a non-retryable
    /// error, the key waits for the next change to its object.
    pub fn on_error(&self, controller: &str, key: &ObjectKey, err: &Error) -> Action {
        if !err.is_retryable() {
            error!(
                controller,
                key = %key,
                error = %err,
                "Sync failed with non-retryable error, dropping key"
            );
            self.reset(key);
            return Action::await_change();
        }

        let attempts = {
            let mut failures = self.lock();
            let count = failures.entry(key.clone()).or_insert(0);
            let attempts = *count;
            *count = count.saturating_add(1);
            attempts
        };

        if attempts < self.max_retries {
            let delay = self.backoff.delay_for_attempt(attempts);
            warn!(
                controller,
                key = %key,
                attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Sync failed, requeuing"
            );
            Action::requeue(delay)
        } else {
            error!(
                controller,
                key = %key,
                attempts,
                error = %err,
                "Dropping key after too many retries"
            );
            self.reset(key);
            Action::await_change()
        }
    }
}

struct EngineContext<K> {
    name: String,
    handler: Arc<dyn SyncHandler>,
    filter: EventFilter<K>,
    retries: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

/// Objects rejected by the filter are skipped unless their key is being
/// retried.
async fn reconcile<K>(obj: Arc<K>, ctx: Arc<EngineContext<K>>) -> Result<Action>
where
    K: Resource,
{
    let key = object_key(obj.as_ref());
    if ctx.retries.failures(&key) == 0 && !(ctx.filter)(obj.as_ref()) {
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    let result = ctx.handler.sync(&key).await;
    if let Some(metrics) = &ctx.metrics {
        metrics.record_sync(&ctx.name, result.is_ok(), started.elapsed().as_secs_f64());
    }
    result?;

    debug!(controller = %ctx.name, key = %key, "Synced");
    ctx.retries.reset(&key);
    Ok(Action::await_change())
}

fn error_policy<K>(obj: Arc<K>, err: &Error, ctx: Arc<EngineContext<K>>) -> Action
where
    K: Resource,
{
    ctx.retries.on_error(&ctx.name, &object_key(obj.as_ref()), err)
}

type ReconcileResult<K> =
    std::result::Result<(kube::runtime::reflector::ObjectRef<K>, Action), controller::Error<Error, watcher::Error>>;

fn log_result<K>(name: &str, retries: &RetryPolicy, result: ReconcileResult<K>)
where
    K: Resource,
{
    match result {
        Ok((obj, _action)) => {
            debug!(controller = name, object = %obj.name, "Reconciled");
        }
        Err(controller::Error::ObjectNotFound(obj)) => {
            debug!(controller = name, object = %obj.name, "Object no longer exists");
            retries.reset(&ObjectKey::new(obj.namespace.unwrap_or_default(), obj.name));
        }
        Err(controller::Error::ReconcilerFailed(err, obj)) if err.is_not_found() => {
            debug!(controller = name, object = %obj.name, "Object no longer exists (likely deleted)");
        }
        Err(e) => {
            error!(controller = name, error = ?e, "Reconciliation error");
        }
    }
}

pub struct Engine {
    name: String,
    handler: Arc<dyn SyncHandler>,
    backoff: BackoffConfig,
    workers: u16,
    cache_sync_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl Engine {
    pub fn new(name: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            backoff: BackoffConfig::default(),
            workers: 1,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Number of objects synced concurrently, at least one
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = u16::try_from(workers.max(1)).unwrap_or(u16::MAX);
        self
    }

    pub fn with_cache_sync_timeout(mut self, timeout: Duration) -> Self {
        self.cache_sync_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Watch `api` and sync objects passing `filter` until `cancel` fires.
    ///
    /// Returns [`Error::CacheSyncFailed`] if the watch cache is not populated
    /// within the cache sync timeout or `cancel` fires first. On cancellation
    /// no new syncs start and `run` returns once in-flight syncs finish.
    pub async fn run<K>(self, api: Api<K>, filter: EventFilter<K>, cancel: CancellationToken) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let controller = Controller::new(api, watcher::Config::default().any_semantic())
            .with_config(controller::Config::default().concurrency(self.workers))
            .graceful_shutdown_on(cancel.clone().cancelled_owned());
        let store = controller.store();

        let ctx = Arc::new(EngineContext {
            name: self.name.clone(),
            handler: self.handler,
            filter,
            retries: RetryPolicy::new(self.backoff, DEFAULT_MAX_RETRIES),
            metrics: self.metrics,
        });

        let logger = ctx.clone();
        let reconciled = controller
            .run(reconcile::<K>, error_policy::<K>, ctx)
            .for_each(move |result| {
                log_result(&logger.name, &logger.retries, result);
                std::future::ready(())
            });
        let mut reconciled = std::pin::pin!(reconciled);

        info!(controller = %self.name, "Waiting for caches to sync");
        let synced = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = &mut reconciled => false,
            ready = tokio::time::timeout(self.cache_sync_timeout, store.wait_until_ready()) => {
                matches!(ready, Ok(Ok(())))
            }
        };
        if !synced {
            return Err(Error::CacheSyncFailed(self.name));
        }

        info!(controller = %self.name, workers = self.workers, "Caches synced, reconciling");
        reconciled.await;
        info!(controller = %self.name, "Controller stopped");
        Ok(())
    }
}
