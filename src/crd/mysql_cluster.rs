use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MySQLCluster describes an InnoDB cluster run as a StatefulSet.
///
/// Backups and restores reference a cluster by name; the agent inside each
/// member pod keeps group membership consistent with `members`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "mysql.example.com",
    version = "v1alpha1",
    kind = "MySQLCluster",
    plural = "mysqlclusters",
    shortname = "mysqlc",
    namespaced,
    status = "MySQLClusterStatus",
    printcolumn = r#"{"name":"Members", "type":"integer", "jsonPath":".spec.members"}"#,
    printcolumn = r#"{"name":"MultiMaster", "type":"boolean", "jsonPath":".spec.multiMaster"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterSpec {
    /// MySQL server version (e.g., "8.0.36")
    #[serde(default = "default_version")]
    pub version: String,

    /// Number of group replication members
    #[serde(default = "default_members")]
    pub members: i32,

    /// Run the group in multi-primary mode
    #[serde(default)]
    pub multi_master: bool,

    /// Secret holding the root password under the `password` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password_secret: Option<LocalObjectReference>,
}

fn default_version() -> String {
    "8.0.36".to_string()
}

fn default_members() -> i32 {
    3
}

/// Status of the MySQLCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MySQLClusterStatus {
    /// Name of the current primary pod, if single-primary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_pod: Option<String>,
}

/// Reference to an object in the same namespace
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
pub struct LocalObjectReference {
    /// Name of the referenced object
    #[serde(default)]
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
