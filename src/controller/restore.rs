//! Sync handlers for MySQLRestore resources

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::{Context, STATUS_WRITE_ATTEMPTS};
use crate::controller::engine::SyncHandler;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::pending::PendingOutcomes;
use crate::controller::scheduler::schedule_member;
use crate::controller::state_machine::WorkEvent;
use crate::controller::status::{ConditionBuilder, is_running, is_scheduled, is_terminal};
use crate::controller::validation::{FieldError, FieldErrors, validate_restore_spec};
use crate::controller::watch::ObjectKey;
use crate::crd::{ConditionType, HasConditions, MySQLBackup, MySQLRestore, ScheduledWork};
use crate::executor::{ExecutorError, ProviderFactory, S3Credentials};
use crate::health::Metrics;

fn backup_name(restore: &MySQLRestore) -> Option<&str> {
    restore
        .spec
        .backup
        .as_ref()
        .map(|b| b.name.as_str())
        .filter(|name| !name.is_empty())
}

/// Operator side: validate and schedule
pub struct RestoreOperatorHandler {
    ctx: Context,
}

impl RestoreOperatorHandler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    /// Check the referenced cluster, backup and the backup's credentials.
    ///
    /// A backup that exists but has not completed yet is a retryable error,
    /// the restore waits for it.
    async fn resolve_references(&self, restore: &MySQLRestore) -> Result<FieldErrors> {
        let namespace = restore.namespace().unwrap_or_default();
        let mut errs = FieldErrors::new();

        if let Some(cluster) = restore.cluster_name() {
            match self.ctx.store.get_cluster(&namespace, cluster).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    errs.push(FieldError::not_found("spec.cluster.name", cluster));
                }
                Err(e) => return Err(e),
            }
        }

        let Some(name) = backup_name(restore) else {
            return Ok(errs);
        };
        let backup = match self.ctx.store.get_backup(&namespace, name).await {
            Ok(backup) => backup,
            Err(e) if e.is_not_found() => {
                errs.push(FieldError::not_found("spec.backup.name", name));
                return Ok(errs);
            }
            Err(e) => return Err(e),
        };

        if backup.is_condition_true(ConditionType::Failed) {
            errs.push(FieldError::invalid(
                "spec.backup.name",
                name,
                "the referenced backup failed",
            ));
            return Ok(errs);
        }

        let secret = backup
            .spec
            .storage_provider
            .as_ref()
            .and_then(|s| s.credentials_secret())
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty());
        if let Some(secret) = secret {
            match self.ctx.store.get_secret(&namespace, secret).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    errs.push(FieldError::not_found(
                        "spec.backup.storageProvider.s3.credentialsSecret.name",
                        secret,
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        if errs.is_empty() && !backup.is_condition_true(ConditionType::Complete) {
            return Err(Error::TransientError(format!(
                "backup {}/{} has not completed",
                namespace, name
            )));
        }

        Ok(errs)
    }

    async fn fail_validation(&self, mut restore: MySQLRestore, errs: FieldErrors) -> Result<()> {
        if !self.ctx.can_apply(&restore, WorkEvent::ValidationFailed) {
            return Ok(());
        }

        let message = errs.to_string();
        info!(errors = %message, "Restore failed validation");

        let changed = ConditionBuilder::new(&mut restore)
            .failed(reasons::FAILED_VALIDATION, &message)
            .changed();
        if !changed {
            return Ok(());
        }

        let restore = self.ctx.store.update_restore_status(&restore).await?;
        self.ctx
            .warn(&restore, reasons::FAILED_VALIDATION, "Validate", message)
            .await;
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for RestoreOperatorHandler {
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let restore = match self.ctx.store.get_restore(&key.namespace, &key.name).await {
            Ok(restore) => restore,
            Err(e) if e.is_not_found() => {
                debug!("Restore no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if is_terminal(&restore) || is_running(&restore) || is_scheduled(&restore) {
            debug!("Restore already scheduled");
            return Ok(());
        }

        let mut errs = validate_restore_spec(&restore.spec);
        if errs.is_empty() {
            errs.extend(self.resolve_references(&restore).await?);
        }
        if !errs.is_empty() {
            return self.fail_validation(restore, errs).await;
        }

        let namespace = restore.namespace().unwrap_or_default();
        let cluster = restore
            .cluster_name()
            .ok_or(Error::MissingObjectKey(".spec.cluster.name"))?
            .to_string();
        let member = schedule_member(self.ctx.store.as_ref(), &namespace, &cluster).await?;

        if !self.ctx.can_apply(&restore, WorkEvent::MemberAssigned) {
            return Ok(());
        }

        let mut restore = restore;
        restore.set_scheduled_member(&member);
        let mut restore = self.ctx.store.update_restore_spec(&restore).await?;

        if ConditionBuilder::new(&mut restore).scheduled(&member).changed() {
            self.ctx.store.update_restore_status(&restore).await?;
        }

        info!(member = %member, cluster = %cluster, "Restore scheduled");
        Ok(())
    }
}

/// Result of a restore run, kept until it is written to the status
#[derive(Clone, Debug)]
enum RestoreResult {
    Restored { backup: String },
    Failed { message: String },
}

/// Agent side: run restores scheduled onto this member
pub struct RestoreAgentHandler {
    ctx: Context,
    providers: Arc<dyn ProviderFactory>,
    hostname: String,
    pending: PendingOutcomes<RestoreResult>,
}

impl RestoreAgentHandler {
    pub fn new(ctx: Context, providers: Arc<dyn ProviderFactory>, hostname: impl Into<String>) -> Self {
        Self {
            ctx,
            providers,
            hostname: hostname.into(),
            pending: PendingOutcomes::default(),
        }
    }

    /// Download the referenced backup and load it
    async fn execute(&self, restore: &MySQLRestore) -> Result<MySQLBackup> {
        let namespace = restore.namespace().unwrap_or_default();
        let name = backup_name(restore).ok_or(Error::MissingObjectKey(".spec.backup.name"))?;
        let backup = self.ctx.store.get_backup(&namespace, name).await?;

        let location = backup
            .status
            .as_ref()
            .and_then(|s| s.outcome.as_ref())
            .map(|o| o.location.clone())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                ExecutorError::InvalidConfig(format!("backup {}/{} has no location", namespace, name))
            })?;
        let executor_spec = backup
            .spec
            .executor
            .as_ref()
            .ok_or_else(|| ExecutorError::InvalidConfig("backup has no executor".into()))?;
        let storage_spec = backup
            .spec
            .storage_provider
            .as_ref()
            .ok_or_else(|| ExecutorError::InvalidConfig("backup has no storage provider".into()))?;

        let credentials = match storage_spec.credentials_secret() {
            Some(secret) => {
                S3Credentials::from_secret(&self.ctx.store.get_secret(&namespace, &secret.name).await?)
            }
            None => S3Credentials::default(),
        };

        let executor = self.providers.executor(executor_spec)?;
        let storage = self.providers.storage(storage_spec, credentials)?;

        info!(backup = %name, location = %location, "Restoring backup");
        let content = storage.retrieve(&location).await?;
        executor.restore(content).await?;

        Ok(backup)
    }

    async fn finish<F>(&self, key: &ObjectKey, update: F) -> Result<MySQLRestore>
    where
        F: Fn(&mut MySQLRestore),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut restore = self.ctx.store.get_restore(&key.namespace, &key.name).await?;
            update(&mut restore);
            match self.ctx.store.update_restore_status(&restore).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(attempt, "Conflict writing restore status, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the terminal status for `result`. The result stays pending
    /// until the write lands, so a failed write is completed by a later
    /// sync.
    async fn complete(&self, key: &ObjectKey, result: RestoreResult) -> Result<()> {
        let written = match &result {
            RestoreResult::Restored { backup } => {
                self.finish(key, |r| {
                    r.status.get_or_insert_with(Default::default).time_completed =
                        Some(Utc::now().to_rfc3339());
                    ConditionBuilder::new(r)
                        .running(false, "Complete", "restore finished")
                        .complete(&format!("restored from backup {}", backup));
                })
                .await
            }
            RestoreResult::Failed { message } => {
                self.finish(key, |r| {
                    ConditionBuilder::new(r)
                        .running(false, reasons::EXECUTION_FAILED, message)
                        .failed(reasons::EXECUTION_FAILED, message);
                })
                .await
            }
        };

        let restore = match written {
            Ok(restore) => restore,
            Err(e) if e.is_not_found() => {
                debug!("Restore deleted before its outcome was recorded");
                self.pending.clear(key);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Failed to record restore outcome, will retry");
                return Err(e);
            }
        };
        self.pending.clear(key);

        match result {
            RestoreResult::Restored { backup } => {
                Metrics::inc(
                    &self.ctx.metrics.restore_success,
                    &self.hostname,
                    restore.cluster_name().unwrap_or_default(),
                );
                self.ctx
                    .normal(
                        &restore,
                        reasons::COMPLETE,
                        "Restore",
                        format!("restored from backup {}", backup),
                    )
                    .await;
                info!(backup = %backup, "Restore complete");
            }
            RestoreResult::Failed { message } => {
                self.ctx
                    .warn(&restore, reasons::EXECUTION_FAILED, "Restore", message)
                    .await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for RestoreAgentHandler {
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name, member = %self.hostname))]
    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let restore = match self.ctx.store.get_restore(&key.namespace, &key.name).await {
            Ok(restore) => restore,
            Err(e) if e.is_not_found() => {
                debug!("Restore no longer exists");
                self.pending.clear(key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if is_terminal(&restore) {
            self.pending.clear(key);
            return Ok(());
        }
        if let Some(result) = self.pending.get(key, restore.uid().as_deref()) {
            info!("Recording outcome of finished restore");
            return self.complete(key, result).await;
        }
        if is_running(&restore) {
            return Ok(());
        }
        if !is_scheduled(&restore) || restore.scheduled_member() != Some(self.hostname.as_str()) {
            debug!(scheduled_member = ?restore.scheduled_member(), "Restore not scheduled here");
            return Ok(());
        }
        if !self.ctx.can_apply(&restore, WorkEvent::ExecutionStarted) {
            return Ok(());
        }

        let mut restore = restore;
        restore.status.get_or_insert_with(Default::default).time_started =
            Some(Utc::now().to_rfc3339());
        ConditionBuilder::new(&mut restore).running(
            true,
            "Started",
            &format!("restore started on {}", self.hostname),
        );
        let restore = self.ctx.store.update_restore_status(&restore).await?;
        info!("Restore started");

        let result = match self.execute(&restore).await {
            Ok(backup) => RestoreResult::Restored {
                backup: backup.name_any(),
            },
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Restore failed");
                RestoreResult::Failed { message }
            }
        };
        self.pending.record(key, restore.uid(), result.clone());
        self.complete(key, result).await
    }
}
