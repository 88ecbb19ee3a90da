mod condition;
mod mysql_backup;
mod mysql_cluster;
mod mysql_restore;

pub use condition::*;
pub use mysql_backup::*;
pub use mysql_cluster::*;
pub use mysql_restore::*;

/// API group shared by every resource and label this operator owns.
pub const GROUP: &str = "mysql.example.com";

/// Label carrying the owning cluster name on every member pod.
pub const CLUSTER_LABEL: &str = "mysql.example.com/cluster";

/// Label carrying the replication role of a member pod (`primary` / `secondary`).
pub const ROLE_LABEL: &str = "mysql.example.com/role";

pub const ROLE_PRIMARY: &str = "primary";
pub const ROLE_SECONDARY: &str = "secondary";

/// Label selector for the member pods of `cluster` carrying `role`
pub fn role_selector(cluster: &str, role: &str) -> String {
    format!("{}={},{}={}", CLUSTER_LABEL, cluster, ROLE_LABEL, role)
}

/// Work item that the operator assigns to one cluster member.
///
/// Implemented by both backups and restores so the scheduler and the event
/// filters can treat them alike.
pub trait ScheduledWork: HasConditions {
    /// Name of the referenced cluster, if set
    fn cluster_name(&self) -> Option<&str>;

    /// Pod the work was assigned to
    fn scheduled_member(&self) -> Option<&str>;

    fn set_scheduled_member(&mut self, member: &str);
}
