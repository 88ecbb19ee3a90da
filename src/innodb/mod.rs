//! InnoDB cluster topology model and the administration-shell port
//!
//! The topology types mirror the JSON document returned by the cluster
//! administration shell (`cluster.status()`); the shell port wraps the
//! operations the cluster manager needs to create, join and repair membership.

pub mod shell;
pub mod status;

pub use shell::{MySqlShell, ProcessShell, ProcessShellFactory, ShellError, ShellFactory, ShellOptions};
pub use status::*;

/// Port MySQL serves client connections on.
pub const MYSQL_DB_PORT: u16 = 3306;

/// Port group replication uses for member-to-member traffic.
pub const GROUP_REPLICATION_PORT: u16 = 13306;

/// Name every cluster is created with.
pub const DEFAULT_CLUSTER_NAME: &str = "Cluster";
