// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for topology snapshots, shell options, seed ordering
//! and the backup/restore lifecycle
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Status snapshots handed out are independent of the original
//! 2. Seed ordering drops only the local member and keeps the configured order
//! 3. The state machine never panics and terminal phases accept nothing
//! 4. Validation is deterministic

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use mysql_operator::cluster::order_seeds;
use mysql_operator::controller::{
    TransitionResult, WorkEvent, WorkPhase, WorkStateMachine, validate_backup_spec,
};
use mysql_operator::crd::{
    ConditionType, DatabaseRef, LocalObjectReference, MySQLBackupStatus,
};
use mysql_operator::innodb::shell::redact_uri;
use mysql_operator::innodb::{ClusterStatus, InstanceStatus, ShellOptions};

use common::*;

// =============================================================================
// Strategies
// =============================================================================

fn instance_status() -> impl Strategy<Value = InstanceStatus> {
    prop_oneof![
        Just(InstanceStatus::Online),
        Just(InstanceStatus::Missing),
        Just(InstanceStatus::Recovering),
        Just(InstanceStatus::Unreachable),
        Just(InstanceStatus::Error),
        Just(InstanceStatus::Unknown),
    ]
}

/// Up to five members `mysql-<i>.mysql` with random statuses
fn members() -> impl Strategy<Value = Vec<(String, InstanceStatus)>> {
    prop::collection::vec(instance_status(), 1..=5).prop_map(|statuses| {
        statuses
            .into_iter()
            .enumerate()
            .map(|(i, s)| (format!("mysql-{}.mysql", i), s))
            .collect()
    })
}

fn work_phase() -> impl Strategy<Value = WorkPhase> {
    prop_oneof![
        Just(WorkPhase::New),
        Just(WorkPhase::Scheduled),
        Just(WorkPhase::Running),
        Just(WorkPhase::Complete),
        Just(WorkPhase::Failed),
    ]
}

fn work_event() -> impl Strategy<Value = WorkEvent> {
    prop_oneof![
        Just(WorkEvent::MemberAssigned),
        Just(WorkEvent::ValidationFailed),
        Just(WorkEvent::ExecutionStarted),
        Just(WorkEvent::ExecutionSucceeded),
        Just(WorkEvent::ExecutionFailed),
    ]
}

fn condition_type() -> impl Strategy<Value = ConditionType> {
    prop_oneof![
        Just(ConditionType::Scheduled),
        Just(ConditionType::Running),
        Just(ConditionType::Complete),
        Just(ConditionType::Failed),
    ]
}

fn option_key() -> impl Strategy<Value = String> {
    "[a-zA-Z]{1,12}"
}

fn option_value() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("true".to_string()),
        Just("FALSE".to_string()),
        "[a-zA-Z0-9./' ]{0,16}",
    ]
}

fn with_members(primary: Option<&str>, members: &[(String, InstanceStatus)]) -> ClusterStatus {
    let refs: Vec<(&str, InstanceStatus)> =
        members.iter().map(|(h, s)| (h.as_str(), *s)).collect();
    topology(primary, &refs)
}

// =============================================================================
// Topology snapshots
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Mutating a deep copy never changes the original
    #[test]
    fn prop_deep_copy_is_independent(members in members(), replacement in instance_status()) {
        let original = with_members(Some("mysql-0.mysql"), &members);
        let before = original.clone();

        let mut copy = original.deep_copy();
        for instance in copy.default_replica_set.topology.values_mut() {
            instance.status = replacement;
        }
        copy.default_replica_set.primary = String::new();
        copy.default_replica_set.topology.clear();

        prop_assert_eq!(original, before);
    }

    /// Property: Every listed member reports its own status, others are NotFound
    #[test]
    fn prop_instance_status_lookup(members in members()) {
        let status = with_members(None, &members);
        for (host, expected) in &members {
            prop_assert_eq!(status.get_instance_status(host), *expected);
        }
        prop_assert_eq!(status.get_instance_status("mysql-99.mysql"), InstanceStatus::NotFound);
    }

    /// Property: The replica set's primary field wins over read-write modes
    #[test]
    fn prop_primary_field_wins(members in members(), pick in any::<prop::sample::Index>()) {
        let (host, _) = &members[pick.index(members.len())];
        let status = with_members(Some(host.as_str()), &members);
        prop_assert_eq!(status.get_primary_addr().unwrap(), format!("{}:3306", host));
    }

    /// Property: With an empty primary field the single read-write member is the primary
    #[test]
    fn prop_multi_primary_uses_read_write_member(members in members(), pick in any::<prop::sample::Index>()) {
        let (writer, _) = &members[pick.index(members.len())];
        let refs: Vec<(&str, InstanceStatus)> =
            members.iter().map(|(h, s)| (h.as_str(), *s)).collect();
        let status = multi_primary_topology(writer, &refs);

        prop_assert!(status.default_replica_set.primary.is_empty());
        prop_assert_eq!(status.get_primary_addr().unwrap(), format!("{}:3306", writer));
    }

    /// Property: Without a primary field and no read-write member there is no primary
    #[test]
    fn prop_no_primary_without_read_write(members in members()) {
        let status = with_members(None, &members);
        prop_assert!(status.get_primary_addr().is_err());
    }
}

// =============================================================================
// Shell options
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Rendering lists every key once, in sorted order
    #[test]
    fn prop_options_render_sorted(entries in prop::collection::btree_map(option_key(), option_value(), 0..6)) {
        let opts = entries
            .iter()
            .fold(ShellOptions::new(), |opts, (k, v)| opts.with(k.clone(), v.clone()));
        let rendered = opts.to_string();

        prop_assert!(rendered.starts_with('{'), "assertion failed: {}", stringify!(rendered.starts_with('{')));
        prop_assert!(rendered.ends_with('}'), "assertion failed: {}", stringify!(rendered.ends_with('}')));
        let mut last = 0;
        for key in entries.keys() {
            let needle = format!("'{}': ", key);
            let at = rendered.find(&needle);
            prop_assert!(at.is_some(), "{} missing from {}", key, rendered);
            let at = at.unwrap();
            prop_assert!(at >= last);
            last = at;
        }
    }

    /// Property: Boolean-like values render as Python literals
    #[test]
    fn prop_boolean_values_are_unquoted(key in option_key(), value in any::<bool>()) {
        let raw = if value { "TrUe" } else { "fAlSe" };
        let rendered = ShellOptions::new().with(key.clone(), raw).to_string();
        let literal = if value { "True" } else { "False" };
        prop_assert_eq!(rendered, format!("{{'{}': {}}}", key, literal));
    }

    /// Property: Later values for a key replace earlier ones
    #[test]
    fn prop_last_value_wins(key in option_key(), first in option_value(), second in option_value()) {
        let opts = ShellOptions::new().with(key.clone(), first).with(key.clone(), second.clone());
        prop_assert_eq!(opts, ShellOptions::new().with(key, second));
    }

    /// Property: Redacted URIs never contain the password
    #[test]
    fn prop_redacted_uri_hides_password(password in "[A-Z0-9]{8,16}", host in "[a-z]{1,8}") {
        let uri = format!("root:{}@{}:3306", password, host);
        let redacted = redact_uri(&uri);
        prop_assert!(!redacted.contains(&password));
        prop_assert!(redacted.ends_with(&format!("@{}:3306", host)), "assertion failed: {}", stringify!(redacted.ends_with(&format!("@{}:3306", host))));
    }
}

// =============================================================================
// Seed ordering
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: The local member is excluded and every other seed kept
    #[test]
    fn prop_order_seeds_excludes_self(size in 1u32..8, pick in any::<prop::sample::Index>()) {
        let all = seeds(size);
        let own = pick.index(size as usize);
        let self_name = format!("mysql-{}.mysql", own);

        let ordered = order_seeds(&all, &self_name);

        prop_assert_eq!(ordered.len(), all.len() - 1);
        prop_assert!(!ordered.iter().any(|s| s.starts_with(&format!("{}:", self_name))), "assertion failed: {}", stringify!(!ordered.iter().any(|s| s.starts_with(&format!("{}:", self_name)))));

        let mut sorted_in = all.clone();
        sorted_in.remove(own);
        sorted_in.sort();
        let mut sorted_out = ordered.clone();
        sorted_out.sort();
        prop_assert_eq!(sorted_in, sorted_out);
    }

    /// Property: The remaining seeds keep their configured order
    #[test]
    fn prop_order_seeds_keeps_configured_order(size in 2u32..8, pick in any::<prop::sample::Index>()) {
        let all = seeds(size);
        let own = pick.index(size as usize);
        let self_name = format!("mysql-{}.mysql", own);

        let ordered = order_seeds(&all, &self_name);

        let mut expected = all.clone();
        expected.remove(own);
        prop_assert_eq!(ordered, expected);
    }

    /// Property: A member not in the list gets the list unchanged
    #[test]
    fn prop_order_seeds_unknown_member(size in 0u32..8) {
        let all = seeds(size);
        prop_assert_eq!(order_seeds(&all, "other-0.other"), all);
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: State machine never panics on any phase/event combination
    #[test]
    fn prop_state_machine_no_panic(phase in work_phase(), event in work_event()) {
        let sm = WorkStateMachine::new();
        let result = sm.transition(phase, event);
        prop_assert_eq!(result.is_success(), sm.can_transition(phase, event));
    }

    /// Property: Terminal phases accept no events
    #[test]
    fn prop_terminal_phases_are_final(event in work_event()) {
        let sm = WorkStateMachine::new();
        prop_assert!(!sm.can_transition(WorkPhase::Complete, event));
        prop_assert!(!sm.can_transition(WorkPhase::Failed, event));
    }

    /// Property: Any event sequence stays on the transition graph
    #[test]
    fn prop_event_sequences_stay_on_graph(events in prop::collection::vec(work_event(), 0..12)) {
        let sm = WorkStateMachine::new();
        let mut phase = WorkPhase::New;
        for event in events {
            if let TransitionResult::Success { from, to, .. } = sm.transition(phase, event) {
                prop_assert_eq!(from, phase);
                prop_assert_ne!(to, WorkPhase::New);
                phase = to;
            }
        }
        if phase.is_terminal() {
            prop_assert!(sm.valid_events(phase).is_empty());
        }
    }

    /// Property: A true Failed condition always folds to Failed
    #[test]
    fn prop_failed_condition_wins(types in prop::collection::vec(condition_type(), 0..4)) {
        let mut backup = test_backup("b", NAMESPACE, valid_backup_spec(CLUSTER));
        let mut conditions: Vec<_> = types.into_iter().map(true_condition).collect();
        conditions.push(true_condition(ConditionType::Failed));
        backup.status = Some(MySQLBackupStatus {
            conditions,
            ..Default::default()
        });
        prop_assert_eq!(WorkPhase::of(&backup), WorkPhase::Failed);
    }
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Validation is deterministic
    #[test]
    fn prop_validation_deterministic(
        databases in prop::collection::vec("[a-z]{0,6}", 0..4),
        bucket in "[a-z]{0,6}",
        cluster in "[a-z]{0,6}",
    ) {
        let mut spec = valid_backup_spec(&cluster);
        spec.cluster = Some(LocalObjectReference::new(&cluster));
        if let Some(mysqldump) = spec.executor.as_mut().and_then(|e| e.mysqldump.as_mut()) {
            mysqldump.databases = databases.iter().map(|name| DatabaseRef { name: name.clone() }).collect();
        }
        if let Some(s3) = spec.storage_provider.as_mut().and_then(|s| s.s3.as_mut()) {
            s3.bucket = bucket;
        }

        let first = validate_backup_spec(&spec);
        let second = validate_backup_spec(&spec);
        prop_assert_eq!(first.to_string(), second.to_string());
    }

    /// Property: A fully populated spec always passes
    #[test]
    fn prop_valid_spec_passes(
        databases in prop::collection::vec("[a-z]{1,6}", 1..4),
        cluster in "[a-z]{1,6}",
    ) {
        let mut spec = valid_backup_spec(&cluster);
        if let Some(mysqldump) = spec.executor.as_mut().and_then(|e| e.mysqldump.as_mut()) {
            mysqldump.databases = databases.into_iter().map(|name| DatabaseRef { name }).collect();
        }
        let errs = validate_backup_spec(&spec);
        prop_assert!(errs.is_empty(), "unexpected errors: {}", errs);
    }
}

#[test]
fn test_fixture_topology_uses_database_port() {
    let status = topology(Some("mysql-0.mysql"), &[("mysql-0.mysql", InstanceStatus::Online)]);
    let addresses: Vec<&String> = status.default_replica_set.topology.keys().collect();
    assert_eq!(addresses, vec!["mysql-0.mysql:3306"]);
}
