//! Backup handlers, operator and agent side

use std::sync::Arc;

use mysql_operator::controller::{
    BackupAgentHandler, BackupOperatorHandler, Error, ObjectKey, SyncHandler, reasons,
};
use mysql_operator::crd::{
    ConditionType, HasConditions, MySQLBackupSpec, ROLE_PRIMARY, ROLE_SECONDARY, ScheduledWork,
};

use crate::common::*;

const BACKUP: &str = "nightly";
const LOCATION: &str = "mysql/nightly.20240101T000000Z.sql.gz";

fn key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, BACKUP)
}

/// Store with a cluster, its credentials and three members
fn populated_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store.add_cluster(test_cluster(CLUSTER, NAMESPACE));
    store.add_secret(test_secret(CREDENTIALS_SECRET, NAMESPACE));
    store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));
    store.add_pod(member_pod("mysql-1", NAMESPACE, CLUSTER, Some(ROLE_SECONDARY)));
    store.add_pod(member_pod("mysql-2", NAMESPACE, CLUSTER, Some(ROLE_SECONDARY)));
    store
}

// =============================================================================
// Operator: validation
// =============================================================================

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_spec_fails_with_single_warning() {
        let store = Arc::new(MemoryStore::default());
        store.add_backup(test_backup(BACKUP, NAMESPACE, MySQLBackupSpec::default()));
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        let failed = backup.condition(ConditionType::Failed).unwrap();
        assert!(failed.is_true());
        assert_eq!(failed.reason, reasons::FAILED_VALIDATION);
        assert!(!backup.is_condition_true(ConditionType::Scheduled));

        let warnings = events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, reasons::FAILED_VALIDATION);
        assert_eq!(warnings[0].object, BACKUP);
        for field in ["spec.executor", "spec.storageProvider", "spec.cluster"] {
            assert!(warnings[0].note.contains(field), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn test_failed_backup_is_not_revalidated() {
        let store = Arc::new(MemoryStore::default());
        store.add_backup(test_backup(BACKUP, NAMESPACE, MySQLBackupSpec::default()));
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();
        handler.sync(&key()).await.unwrap();

        assert_eq!(events.warnings().len(), 1);
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_missing_cluster_is_reported() {
        let store = Arc::new(MemoryStore::default());
        store.add_secret(test_secret(CREDENTIALS_SECRET, NAMESPACE));
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec("missing")));
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        let failed = backup.condition(ConditionType::Failed).unwrap();
        assert_eq!(failed.message, "spec.cluster.name: Not found: \"missing\"");
    }

    #[tokio::test]
    async fn test_missing_credentials_secret_is_reported() {
        let store = Arc::new(MemoryStore::default());
        store.add_cluster(test_cluster(CLUSTER, NAMESPACE));
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        assert!(backup.is_condition_true(ConditionType::Failed));
        assert!(events.warnings()[0]
            .note
            .contains("spec.storageProvider.s3.credentialsSecret.name"));
    }

    #[tokio::test]
    async fn test_deleted_backup_is_ignored() {
        let store = Arc::new(MemoryStore::default());
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();
        assert!(events.all().is_empty());
    }
}

// =============================================================================
// Operator: scheduling
// =============================================================================

mod scheduling_tests {
    use super::*;

    #[tokio::test]
    async fn test_scheduled_on_first_secondary() {
        let store = populated_store();
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupOperatorHandler::new(test_context(store.clone(), events.clone()));

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        assert_eq!(backup.scheduled_member(), Some("mysql-1"));
        let scheduled = backup.condition(ConditionType::Scheduled).unwrap();
        assert!(scheduled.is_true());
        assert!(scheduled.message.contains("mysql-1"));
        assert!(events.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_single_member_cluster_uses_primary() {
        let store = Arc::new(MemoryStore::default());
        store.add_cluster(test_cluster(CLUSTER, NAMESPACE));
        store.add_secret(test_secret(CREDENTIALS_SECRET, NAMESPACE));
        store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let handler = BackupOperatorHandler::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
        ));

        handler.sync(&key()).await.unwrap();

        assert_eq!(
            store.backup(NAMESPACE, BACKUP).scheduled_member(),
            Some("mysql-0")
        );
    }

    #[tokio::test]
    async fn test_no_members_is_retryable() {
        let store = Arc::new(MemoryStore::default());
        store.add_cluster(test_cluster(CLUSTER, NAMESPACE));
        store.add_secret(test_secret(CREDENTIALS_SECRET, NAMESPACE));
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let handler = BackupOperatorHandler::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
        ));

        let err = handler.sync(&key()).await.unwrap_err();
        assert!(matches!(err, Error::NoPrimaryFound(ref c) if c == CLUSTER));
        assert!(err.is_retryable());

        let backup = store.backup(NAMESPACE, BACKUP);
        assert!(backup.conditions().is_empty());
        assert_eq!(backup.scheduled_member(), None);
    }

    #[tokio::test]
    async fn test_already_scheduled_backup_is_left_alone() {
        let store = populated_store();
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let handler = BackupOperatorHandler::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
        ));

        handler.sync(&key()).await.unwrap();
        let writes = store.status_writes();
        handler.sync(&key()).await.unwrap();

        assert_eq!(store.status_writes(), writes);
    }
}

// =============================================================================
// Agent: execution
// =============================================================================

mod agent_tests {
    use super::*;

    async fn scheduled_store() -> Arc<MemoryStore> {
        let store = populated_store();
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        BackupOperatorHandler::new(test_context(
            store.clone(),
            Arc::new(RecordingEvents::default()),
        ))
        .sync(&key())
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn test_backup_runs_to_completion() {
        let store = scheduled_store().await;
        let events = Arc::new(RecordingEvents::default());
        let providers = FakeProviders::default();
        let ctx = test_context(store.clone(), events.clone());
        let metrics = ctx.metrics.clone();
        let handler = BackupAgentHandler::new(ctx, Arc::new(providers.clone()), "mysql-1");

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        assert!(backup.is_condition_true(ConditionType::Complete));
        assert!(!backup.is_condition_true(ConditionType::Running));
        assert!(!backup.is_condition_true(ConditionType::Failed));

        let status = backup.status.unwrap();
        assert_eq!(status.outcome.unwrap().location, LOCATION);
        assert!(status.time_started.is_some());
        assert!(status.time_completed.is_some());

        assert_eq!(providers.prefixes(), vec!["mysql/nightly".to_string()]);
        assert!(providers.object(LOCATION).is_some());
        assert_eq!(providers.access_keys(), vec!["AKIAEXAMPLE".to_string()]);

        let all = events.all();
        assert_eq!(all.len(), 1);
        assert!(!all[0].warning);
        assert_eq!(all[0].reason, reasons::COMPLETE);
        assert_eq!(counter(&metrics.backup_success, "mysql-1"), 1);
    }

    #[tokio::test]
    async fn test_backup_scheduled_elsewhere_is_ignored() {
        let store = scheduled_store().await;
        let writes = store.status_writes();
        let providers = FakeProviders::default();
        let handler = BackupAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(providers.clone()),
            "mysql-2",
        );

        handler.sync(&key()).await.unwrap();

        assert_eq!(store.status_writes(), writes);
        assert!(providers.prefixes().is_empty());
    }

    #[tokio::test]
    async fn test_unscheduled_backup_is_ignored() {
        let store = populated_store();
        store.add_backup(test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER)));
        let providers = FakeProviders::default();
        let handler = BackupAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(providers.clone()),
            "mysql-1",
        );

        handler.sync(&key()).await.unwrap();

        assert_eq!(store.status_writes(), 0);
        assert!(providers.prefixes().is_empty());
    }

    #[tokio::test]
    async fn test_executor_failure_marks_backup_failed() {
        let store = scheduled_store().await;
        let events = Arc::new(RecordingEvents::default());
        let providers = FakeProviders::failing_backups();
        let ctx = test_context(store.clone(), events.clone());
        let metrics = ctx.metrics.clone();
        let handler = BackupAgentHandler::new(ctx, Arc::new(providers), "mysql-1");

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        let failed = backup.condition(ConditionType::Failed).unwrap();
        assert!(failed.is_true());
        assert_eq!(failed.reason, reasons::EXECUTION_FAILED);
        assert!(failed.message.contains("Access denied"));
        assert!(!backup.is_condition_true(ConditionType::Running));
        assert!(backup.status.unwrap().outcome.is_none());

        let warnings = events.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].action, "Backup");
        assert_eq!(counter(&metrics.backup_success, "mysql-1"), 0);
    }

    #[tokio::test]
    async fn test_final_write_retries_conflicts() {
        let store = scheduled_store().await;
        // Running=True goes through, the first two completion writes conflict
        store.inject_status_conflicts(1, 2);
        let handler = BackupAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(FakeProviders::default()),
            "mysql-1",
        );

        handler.sync(&key()).await.unwrap();

        assert!(store
            .backup(NAMESPACE, BACKUP)
            .is_condition_true(ConditionType::Complete));
    }

    #[tokio::test]
    async fn test_outcome_is_recorded_on_next_sync_after_final_write_fails() {
        let store = scheduled_store().await;
        // Running=True goes through, every completion write of the first sync conflicts
        store.inject_status_conflicts(1, 3);
        let events = Arc::new(RecordingEvents::default());
        let providers = FakeProviders::default();
        let ctx = test_context(store.clone(), events.clone());
        let metrics = ctx.metrics.clone();
        let handler = BackupAgentHandler::new(ctx, Arc::new(providers.clone()), "mysql-1");

        let err = handler.sync(&key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(store
            .backup(NAMESPACE, BACKUP)
            .is_condition_true(ConditionType::Running));
        assert!(events.all().is_empty());

        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        assert!(backup.is_condition_true(ConditionType::Complete));
        assert!(!backup.is_condition_true(ConditionType::Running));
        let status = backup.status.unwrap();
        assert_eq!(status.outcome.unwrap().location, LOCATION);
        assert!(status.time_completed.is_some());

        // the dump ran once, the second sync only wrote its outcome
        assert_eq!(providers.prefixes().len(), 1);
        assert_eq!(events.all().len(), 1);
        assert_eq!(events.all()[0].reason, reasons::COMPLETE);
        assert_eq!(counter(&metrics.backup_success, "mysql-1"), 1);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_on_next_sync_after_final_write_fails() {
        let store = scheduled_store().await;
        store.inject_status_conflicts(1, 3);
        let events = Arc::new(RecordingEvents::default());
        let handler = BackupAgentHandler::new(
            test_context(store.clone(), events.clone()),
            Arc::new(FakeProviders::failing_backups()),
            "mysql-1",
        );

        assert!(handler.sync(&key()).await.unwrap_err().is_conflict());
        handler.sync(&key()).await.unwrap();

        let backup = store.backup(NAMESPACE, BACKUP);
        let failed = backup.condition(ConditionType::Failed).unwrap();
        assert!(failed.is_true());
        assert!(failed.message.contains("Access denied"));
        assert!(!backup.is_condition_true(ConditionType::Running));
        assert_eq!(events.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_running_backup_without_recorded_outcome_is_left_alone() {
        let store = scheduled_store().await;
        let providers = FakeProviders::default();
        let handler = BackupAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(providers.clone()),
            "mysql-1",
        );
        let mut backup = store.backup(NAMESPACE, BACKUP);
        backup.conditions_mut().push(true_condition(ConditionType::Running));
        store.add_backup(backup);
        let writes = store.status_writes();

        handler.sync(&key()).await.unwrap();

        assert_eq!(store.status_writes(), writes);
        assert!(providers.prefixes().is_empty());
    }
}
