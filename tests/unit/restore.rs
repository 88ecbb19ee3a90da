//! Restore handlers, operator and agent side

use std::sync::Arc;

use bytes::Bytes;
use mysql_operator::controller::{
    Error, ObjectKey, RestoreAgentHandler, RestoreOperatorHandler, SyncHandler, reasons,
};
use mysql_operator::crd::{
    ConditionType, HasConditions, MySQLBackupStatus, ROLE_PRIMARY, ROLE_SECONDARY, ScheduledWork,
};

use crate::common::*;

const RESTORE: &str = "restore-nightly";
const BACKUP: &str = "nightly";
const LOCATION: &str = "mysql/nightly.20240101T000000Z.sql.gz";

fn key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, RESTORE)
}

fn populated_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store.add_cluster(test_cluster(CLUSTER, NAMESPACE));
    store.add_secret(test_secret(CREDENTIALS_SECRET, NAMESPACE));
    store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));
    store.add_pod(member_pod("mysql-1", NAMESPACE, CLUSTER, Some(ROLE_SECONDARY)));
    store.add_restore(test_restore(RESTORE, NAMESPACE, CLUSTER, BACKUP));
    store
}

fn operator(store: &Arc<MemoryStore>, events: &Arc<RecordingEvents>) -> RestoreOperatorHandler {
    RestoreOperatorHandler::new(test_context(store.clone(), events.clone()))
}

// =============================================================================
// Operator
// =============================================================================

mod operator_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_backup_fails_validation() {
        let store = populated_store();
        let events = Arc::new(RecordingEvents::default());

        operator(&store, &events).sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        let failed = restore.condition(ConditionType::Failed).unwrap();
        assert_eq!(failed.reason, reasons::FAILED_VALIDATION);
        assert_eq!(failed.message, "spec.backup.name: Not found: \"nightly\"");
        assert_eq!(events.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_backup_fails_validation() {
        let store = populated_store();
        store.add_backup(failed_backup(BACKUP, NAMESPACE, CLUSTER));
        let events = Arc::new(RecordingEvents::default());

        operator(&store, &events).sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        assert!(restore.is_condition_true(ConditionType::Failed));
        assert!(events.warnings()[0].note.contains("the referenced backup failed"));
    }

    #[tokio::test]
    async fn test_incomplete_backup_is_retried() {
        let store = populated_store();
        let mut backup = test_backup(BACKUP, NAMESPACE, valid_backup_spec(CLUSTER));
        backup.status = Some(MySQLBackupStatus {
            conditions: vec![true_condition(ConditionType::Running)],
            ..Default::default()
        });
        store.add_backup(backup);
        let events = Arc::new(RecordingEvents::default());

        let err = operator(&store, &events).sync(&key()).await.unwrap_err();
        assert!(matches!(err, Error::TransientError(_)));
        assert!(err.is_retryable());

        let restore = store.restore(NAMESPACE, RESTORE);
        assert!(restore.conditions().is_empty());
        assert!(events.all().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_and_backup_reported_together() {
        let store = Arc::new(MemoryStore::default());
        store.add_restore(test_restore(RESTORE, NAMESPACE, "gone", "also-gone"));
        let events = Arc::new(RecordingEvents::default());

        operator(&store, &events).sync(&key()).await.unwrap();

        let note = &events.warnings()[0].note;
        assert!(note.starts_with('['));
        assert!(note.contains("spec.cluster.name: Not found: \"gone\""));
        assert!(note.contains("spec.backup.name: Not found: \"also-gone\""));
    }

    #[tokio::test]
    async fn test_completed_backup_is_scheduled() {
        let store = populated_store();
        store.add_backup(completed_backup(BACKUP, NAMESPACE, CLUSTER, LOCATION));
        let events = Arc::new(RecordingEvents::default());

        operator(&store, &events).sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        assert_eq!(restore.scheduled_member(), Some("mysql-1"));
        assert!(restore.is_condition_true(ConditionType::Scheduled));
        assert!(events.all().is_empty());
    }
}

// =============================================================================
// Agent
// =============================================================================

mod agent_tests {
    use super::*;

    async fn scheduled_store() -> Arc<MemoryStore> {
        let store = populated_store();
        store.add_backup(completed_backup(BACKUP, NAMESPACE, CLUSTER, LOCATION));
        operator(&store, &Arc::new(RecordingEvents::default()))
            .sync(&key())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_restore_runs_to_completion() {
        let store = scheduled_store().await;
        let providers = FakeProviders::default();
        providers.put_object(LOCATION, "-- dump of mysql/nightly");
        let events = Arc::new(RecordingEvents::default());
        let ctx = test_context(store.clone(), events.clone());
        let metrics = ctx.metrics.clone();
        let handler = RestoreAgentHandler::new(ctx, Arc::new(providers.clone()), "mysql-1");

        handler.sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        assert!(restore.is_condition_true(ConditionType::Complete));
        assert!(!restore.is_condition_true(ConditionType::Running));
        let status = restore.status.unwrap();
        assert!(status.time_started.is_some());
        assert!(status.time_completed.is_some());

        assert_eq!(
            providers.restored(),
            vec![Bytes::from_static(b"-- dump of mysql/nightly")]
        );
        assert_eq!(events.all().len(), 1);
        assert_eq!(events.all()[0].reason, reasons::COMPLETE);
        assert_eq!(counter(&metrics.restore_success, "mysql-1"), 1);
    }

    #[tokio::test]
    async fn test_missing_archive_marks_restore_failed() {
        let store = scheduled_store().await;
        let providers = FakeProviders::default();
        let events = Arc::new(RecordingEvents::default());
        let handler = RestoreAgentHandler::new(
            test_context(store.clone(), events.clone()),
            Arc::new(providers.clone()),
            "mysql-1",
        );

        handler.sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        let failed = restore.condition(ConditionType::Failed).unwrap();
        assert_eq!(failed.reason, reasons::EXECUTION_FAILED);
        assert!(failed.message.contains(LOCATION));
        assert!(providers.restored().is_empty());
        assert_eq!(events.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_on_other_member_is_ignored() {
        let store = scheduled_store().await;
        let writes = store.status_writes();
        let providers = FakeProviders::default();
        providers.put_object(LOCATION, "-- dump");
        let handler = RestoreAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(providers.clone()),
            "mysql-0",
        );

        handler.sync(&key()).await.unwrap();

        assert_eq!(store.status_writes(), writes);
        assert!(providers.restored().is_empty());
    }

    #[tokio::test]
    async fn test_completed_restore_is_not_rerun() {
        let store = scheduled_store().await;
        let providers = FakeProviders::default();
        providers.put_object(LOCATION, "-- dump");
        let handler = RestoreAgentHandler::new(
            test_context(store.clone(), Arc::new(RecordingEvents::default())),
            Arc::new(providers.clone()),
            "mysql-1",
        );

        handler.sync(&key()).await.unwrap();
        handler.sync(&key()).await.unwrap();

        assert_eq!(providers.restored().len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_is_recorded_on_next_sync_after_final_write_fails() {
        let store = scheduled_store().await;
        store.inject_status_conflicts(1, 3);
        let providers = FakeProviders::default();
        providers.put_object(LOCATION, "-- dump of mysql/nightly");
        let events = Arc::new(RecordingEvents::default());
        let ctx = test_context(store.clone(), events.clone());
        let metrics = ctx.metrics.clone();
        let handler = RestoreAgentHandler::new(ctx, Arc::new(providers.clone()), "mysql-1");

        let err = handler.sync(&key()).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store
            .restore(NAMESPACE, RESTORE)
            .is_condition_true(ConditionType::Running));

        handler.sync(&key()).await.unwrap();

        let restore = store.restore(NAMESPACE, RESTORE);
        let complete = restore.condition(ConditionType::Complete).unwrap();
        assert!(complete.is_true());
        assert!(complete.message.contains(BACKUP));
        assert!(!restore.is_condition_true(ConditionType::Running));
        assert!(restore.status.unwrap().time_completed.is_some());

        assert_eq!(providers.restored().len(), 1);
        assert_eq!(events.all().len(), 1);
        assert_eq!(counter(&metrics.restore_success, "mysql-1"), 1);
    }

    #[tokio::test]
    async fn test_outcome_is_dropped_when_restore_is_deleted() {
        let store = scheduled_store().await;
        store.inject_status_conflicts(1, 3);
        let providers = FakeProviders::default();
        providers.put_object(LOCATION, "-- dump");
        let events = Arc::new(RecordingEvents::default());
        let handler = RestoreAgentHandler::new(
            test_context(store.clone(), events.clone()),
            Arc::new(providers),
            "mysql-1",
        );

        assert!(handler.sync(&key()).await.is_err());
        store.remove_restore(NAMESPACE, RESTORE);

        handler.sync(&key()).await.unwrap();
        assert!(events.all().is_empty());
    }
}
