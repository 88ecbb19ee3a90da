use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Condition, HasConditions, LocalObjectReference, ScheduledWork};

/// MySQLBackup requests a one-off logical backup of a cluster.
///
/// The operator validates the request and schedules it onto a member pod;
/// the agent on that member runs the executor and uploads the result.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "mysql.example.com",
    version = "v1alpha1",
    kind = "MySQLBackup",
    plural = "mysqlbackups",
    shortname = "mysqlb",
    namespaced,
    status = "MySQLBackupStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.cluster.name"}"#,
    printcolumn = r#"{"name":"Member", "type":"string", "jsonPath":".spec.scheduledMember"}"#,
    printcolumn = r#"{"name":"Location", "type":"string", "jsonPath":".status.outcome.location"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLBackupSpec {
    /// Tool used to produce the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<BackupExecutorSpec>,

    /// Where the backup is stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_provider: Option<StorageProviderSpec>,

    /// Cluster to back up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<LocalObjectReference>,

    /// Member pod the backup has been scheduled on (set by the operator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_member: Option<String>,
}

/// Backup executor configuration; exactly one provider must be set
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupExecutorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysqldump: Option<MysqldumpExecutorSpec>,
}

/// Logical backup via `mysqldump`
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MysqldumpExecutorSpec {
    /// Databases to dump
    #[serde(default)]
    pub databases: Vec<DatabaseRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct DatabaseRef {
    pub name: String,
}

/// Storage configuration; exactly one provider must be set
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3StorageSpec>,
}

impl StorageProviderSpec {
    /// Name of the credentials secret of whichever provider is configured
    pub fn credentials_secret(&self) -> Option<&LocalObjectReference> {
        self.s3.as_ref().map(|s3| &s3.credentials_secret)
    }
}

/// S3-compatible object storage
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3StorageSpec {
    /// Endpoint URL (leave empty for AWS)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub bucket: String,

    /// Use path-style addressing instead of virtual-hosted buckets
    #[serde(default)]
    pub force_path_style: bool,

    /// Secret with `accessKey` and `secretKey` entries
    #[serde(default)]
    pub credentials_secret: LocalObjectReference,
}

/// Status of the MySQLBackup
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MySQLBackupStatus {
    /// When the executor started (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_started: Option<String>,

    /// When the backup was stored (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_completed: Option<String>,

    /// Result of a successful backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BackupOutcome>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
pub struct BackupOutcome {
    /// Storage key of the backup archive
    pub location: String,
}

impl HasConditions for MySQLBackup {
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

impl ScheduledWork for MySQLBackup {
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
