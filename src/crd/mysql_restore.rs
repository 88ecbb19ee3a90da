use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, HasConditions, LocalObjectReference, ScheduledWork};

/// MySQLRestore loads a completed MySQLBackup into a cluster.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "mysql.example.com",
    version = "v1alpha1",
    kind = "MySQLRestore",
    plural = "mysqlrestores",
    shortname = "mysqlr",
    namespaced,
    status = "MySQLRestoreStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster.name"}"#,
    printcolumn = r#"{"name":"Backup", "type":"string", "jsonPath":".spec.backup.name"}"#,
    printcolumn = r#"{"name":"Member", "type":"string", "jsonPath":".spec.scheduledMember"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLRestoreSpec {
    /// Cluster to restore into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<LocalObjectReference>,

    /// Backup to restore from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<LocalObjectReference>,

    /// Member pod the restore has been scheduled on (set by the operator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_member: Option<String>,
}

/// Status of the MySQLRestore
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySQLRestoreStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_completed: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HasConditions for MySQLRestore {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}

impl ScheduledWork for MySQLRestore {
    fn cluster_name(&self) -> Option<&str> {
        self.spec
            .cluster
            .as_ref()
            .map(|c| c.name.as_str())
            .filter(|name| !name.is_empty())
    }

    fn scheduled_member(&self) -> Option<&str> {
        self.spec
            .scheduled_member
            .as_deref()
            .filter(|member| !member.is_empty())
    }

    fn set_scheduled_member(&mut self, member: &str) {
        self.spec.scheduled_member = Some(member.to_string());
    }
}
