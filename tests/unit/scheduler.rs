//! Member selection for backup and restore work

use mysql_operator::controller::{Error, schedule_member};
use mysql_operator::crd::{ROLE_PRIMARY, ROLE_SECONDARY};

use crate::common::*;

#[tokio::test]
async fn test_prefers_secondary() {
    let store = MemoryStore::default();
    store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));
    store.add_pod(member_pod("mysql-1", NAMESPACE, CLUSTER, Some(ROLE_SECONDARY)));

    let member = schedule_member(&store, NAMESPACE, CLUSTER).await.unwrap();
    assert_eq!(member, "mysql-1");
}

#[tokio::test]
async fn test_selection_is_deterministic() {
    let store = MemoryStore::default();
    for name in ["mysql-3", "mysql-1", "mysql-2"] {
        store.add_pod(member_pod(name, NAMESPACE, CLUSTER, Some(ROLE_SECONDARY)));
    }
    store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));

    for _ in 0..5 {
        let member = schedule_member(&store, NAMESPACE, CLUSTER).await.unwrap();
        assert_eq!(member, "mysql-1");
    }
}

#[tokio::test]
async fn test_falls_back_to_primary() {
    let store = MemoryStore::default();
    store.add_pod(member_pod("mysql-0", NAMESPACE, CLUSTER, Some(ROLE_PRIMARY)));

    let member = schedule_member(&store, NAMESPACE, CLUSTER).await.unwrap();
    assert_eq!(member, "mysql-0");
}

#[tokio::test]
async fn test_unlabeled_and_foreign_pods_are_ignored() {
    let store = MemoryStore::default();
    store.add_pod(member_pod("mysql-1", NAMESPACE, CLUSTER, None));
    store.add_pod(member_pod("other-0", NAMESPACE, "other", Some(ROLE_SECONDARY)));
    store.add_pod(member_pod("mysql-2", "elsewhere", CLUSTER, Some(ROLE_SECONDARY)));

    let err = schedule_member(&store, NAMESPACE, CLUSTER).await.unwrap_err();
    assert!(matches!(err, Error::NoPrimaryFound(_)));
    assert_eq!(err.to_string(), "no primaries found for cluster \"mysql\"");
}
