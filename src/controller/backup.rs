//! Sync handlers for MySQLBackup resources
//!
//! The operator validates a backup and assigns it to a member; the agent on
//! that member runs the executor and uploads the dump.

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
use crate::controller::validation::{FieldError, FieldErrors, validate_backup_spec};
use crate::controller::watch::ObjectKey;
use crate::crd::{BackupOutcome, MySQLBackup, ScheduledWork};
use crate::executor::{ExecutorError, ProviderFactory, S3Credentials};
use crate::health::Metrics;

/// Check that the objects a backup refers to exist
pub async fn resolve_backup_references(ctx: &Context, backup: &MySQLBackup) -> Result<FieldErrors> {
    let namespace = backup.namespace().unwrap_or_default();
    let mut errs = FieldErrors::new();

    if let Some(cluster) = backup.cluster_name() {
        match ctx.store.get_cluster(&namespace, cluster).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                errs.push(FieldError::not_found("spec.cluster.name", cluster));
            }
            Err(e) => return Err(e),
        }
    }

    let secret = backup
        .spec
        .storage_provider
        .as_ref()
        .and_then(|s| s.credentials_secret())
        .map(|s| s.name.as_str())
        .filter(|name| !name.is_empty());
    if let Some(secret) = secret {
        match ctx.store.get_secret(&namespace, secret).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                errs.push(FieldError::not_found(
                    "spec.storageProvider.s3.credentialsSecret.name",
                    secret,
                ));
            }
            Err(e) => return Err(e),
        }
    }

    Ok(errs)
}

/// Operator side: validate and schedule
pub struct BackupOperatorHandler {
    ctx: Context,
}

impl BackupOperatorHandler {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    async fn fail_validation(&self, mut backup: MySQLBackup, errs: FieldErrors) -> Result<()> {
        if !self.ctx.can_apply(&backup, WorkEvent::ValidationFailed) {
            return Ok(());
        }

        let message = errs.to_string();
        info!(errors = %message, "Backup failed validation");

        let changed = ConditionBuilder::new(&mut backup)
            .failed(reasons::FAILED_VALIDATION, &message)
            .changed();
        if !changed {
            return Ok(());
        }

        let backup = self.ctx.store.update_backup_status(&backup).await?;
        self.ctx
            .warn(&backup, reasons::FAILED_VALIDATION, "Validate", message)
            .await;
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for BackupOperatorHandler {
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let backup = match self.ctx.store.get_backup(&key.namespace, &key.name).await {
            Ok(backup) => backup,
            Err(e) if e.is_not_found() => {
                debug!("Backup no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if is_terminal(&backup) || is_running(&backup) || is_scheduled(&backup) {
            debug!("Backup already scheduled");
            return Ok(());
        }

        let mut errs = validate_backup_spec(&backup.spec);
        if errs.is_empty() {
            errs.extend(resolve_backup_references(&self.ctx, &backup).await?);
        }
        if !errs.is_empty() {
            return self.fail_validation(backup, errs).await;
        }

        let namespace = backup.namespace().unwrap_or_default();
        let cluster = backup
            .cluster_name()
            .ok_or(Error::MissingObjectKey(".spec.cluster.name"))?
            .to_string();
        let member = schedule_member(self.ctx.store.as_ref(), &namespace, &cluster).await?;

        if !self.ctx.can_apply(&backup, WorkEvent::MemberAssigned) {
            return Ok(());
        }

        let mut backup = backup;
        backup.set_scheduled_member(&member);
        let mut backup = self.ctx.store.update_backup_spec(&backup).await?;

        if ConditionBuilder::new(&mut backup).scheduled(&member).changed() {
            self.ctx.store.update_backup_status(&backup).await?;
        }

        info!(member = %member, cluster = %cluster, "Backup scheduled");
        Ok(())
    }
}

/// Result of a backup run, kept until it is written to the status
#[derive(Clone, Debug)]
enum BackupResult {
    Stored { location: String },
    Failed { message: String },
}

/// Agent side: run backups scheduled onto this member
pub struct BackupAgentHandler {
    ctx: Context,
    providers: Arc<dyn ProviderFactory>,
    hostname: String,
    pending: PendingOutcomes<BackupResult>,
}

impl BackupAgentHandler {
    pub fn new(ctx: Context, providers: Arc<dyn ProviderFactory>, hostname: impl Into<String>) -> Self {
        Self {
            ctx,
            providers,
            hostname: hostname.into(),
            pending: PendingOutcomes::default(),
        }
    }

    /// Dump and upload, returning the storage location
    async fn execute(&self, backup: &MySQLBackup) -> Result<String> {
        let namespace = backup.namespace().unwrap_or_default();
        let cluster = backup
            .cluster_name()
            .ok_or(Error::MissingObjectKey(".spec.cluster.name"))?;
        let executor_spec = backup
            .spec
            .executor
            .as_ref()
            .ok_or_else(|| ExecutorError::InvalidConfig("no executor configured".into()))?;
        let storage_spec = backup
            .spec
            .storage_provider
            .as_ref()
            .ok_or_else(|| ExecutorError::InvalidConfig("no storage provider configured".into()))?;

        let credentials = match storage_spec.credentials_secret() {
            Some(secret) => {
                S3Credentials::from_secret(&self.ctx.store.get_secret(&namespace, &secret.name).await?)
            }
            None => S3Credentials::default(),
        };

        let executor = self.providers.executor(executor_spec)?;
        let storage = self.providers.storage(storage_spec, credentials)?;

        let prefix = format!("{}/{}", cluster, backup.name_any());
        let artifact = executor.backup(&prefix).await?;
        storage.store(&artifact.location, artifact.content).await?;

        Ok(artifact.location)
    }

    /// Re-read the backup and apply `update` to its status, retrying on
    /// write conflicts.
    async fn finish<F>(&self, key: &ObjectKey, update: F) -> Result<MySQLBackup>
    where
        F: Fn(&mut MySQLBackup),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut backup = self.ctx.store.get_backup(&key.namespace, &key.name).await?;
            update(&mut backup);
            match self.ctx.store.update_backup_status(&backup).await {
                Ok(updated) => return Ok(updated),
                Err(e) if e.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(attempt, "Conflict writing backup status, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the terminal status for `result`. The result stays pending
    /// until the write lands, so a failed write is completed by a later
    /// sync.
    async fn complete(&self, key: &ObjectKey, result: BackupResult) -> Result<()> {
        let written = match &result {
            BackupResult::Stored { location } => {
                self.finish(key, |b| {
                    let status = b.status.get_or_insert_with(Default::default);
                    status.time_completed = Some(Utc::now().to_rfc3339());
                    status.outcome = Some(BackupOutcome {
                        location: location.clone(),
                    });
                    ConditionBuilder::new(b)
                        .running(false, "Complete", "backup finished")
                        .complete(&format!("backup stored at {}", location));
                })
                .await
            }
            BackupResult::Failed { message } => {
                self.finish(key, |b| {
                    ConditionBuilder::new(b)
                        .running(false, reasons::EXECUTION_FAILED, message)
                        .failed(reasons::EXECUTION_FAILED, message);
                })
                .await
            }
        };

        let backup = match written {
            Ok(backup) => backup,
            Err(e) if e.is_not_found() => {
                debug!("Backup deleted before its outcome was recorded");
                self.pending.clear(key);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Failed to record backup outcome, will retry");
                return Err(e);
            }
        };
        self.pending.clear(key);

        match result {
            BackupResult::Stored { location } => {
                Metrics::inc(
                    &self.ctx.metrics.backup_success,
                    &self.hostname,
                    backup.cluster_name().unwrap_or_default(),
                );
                self.ctx
                    .normal(
                        &backup,
                        reasons::COMPLETE,
                        "Backup",
                        format!("backup stored at {}", location),
                    )
                    .await;
                info!(location = %location, "Backup complete");
            }
            BackupResult::Failed { message } => {
                self.ctx
                    .warn(&backup, reasons::EXECUTION_FAILED, "Backup", message)
                    .await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for BackupAgentHandler {
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name, member = %self.hostname))]
    async fn sync(&self, key: &ObjectKey) -> Result<()> {
        let backup = match self.ctx.store.get_backup(&key.namespace, &key.name).await {
            Ok(backup) => backup,
            Err(e) if e.is_not_found() => {
                debug!("Backup no longer exists");
                self.pending.clear(key);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if is_terminal(&backup) {
            self.pending.clear(key);
            return Ok(());
        }
        if let Some(result) = self.pending.get(key, backup.uid().as_deref()) {
            info!("Recording outcome of finished backup");
            return self.complete(key, result).await;
        }
        if is_running(&backup) {
            return Ok(());
        }
        if !is_scheduled(&backup) || backup.scheduled_member() != Some(self.hostname.as_str()) {
            debug!(scheduled_member = ?backup.scheduled_member(), "Backup not scheduled here");
            return Ok(());
        }
        if !self.ctx.can_apply(&backup, WorkEvent::ExecutionStarted) {
            return Ok(());
        }

        let mut backup = backup;
        backup.status.get_or_insert_with(Default::default).time_started =
            Some(Utc::now().to_rfc3339());
        ConditionBuilder::new(&mut backup).running(
            true,
            "Started",
            &format!("backup started on {}", self.hostname),
        );
        let backup = self.ctx.store.update_backup_status(&backup).await?;
        info!("Backup started");

        let result = match self.execute(&backup).await {
            Ok(location) => BackupResult::Stored { location },
            Err(e) => {
                let message = e.to_string();
                error!(error = %message, "Backup failed");
                BackupResult::Failed { message }
            }
        };
        self.pending.record(key, backup.uid(), result.clone());
        self.complete(key, result).await
    }
}
