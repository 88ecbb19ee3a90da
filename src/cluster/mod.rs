//! Per-member cluster membership reconciliation
//!
//! The agent in every MySQL pod runs a [`ClusterManager`] loop that reads the
//! group topology through the administration shell and moves the local
//! member towards `ONLINE`: creating or rebooting the cluster on the first
//! pod, adding, rejoining or removing the member otherwise. While the local
//! member is primary it also runs a [`PrimaryWorker`] that labels pods by
//! role.

mod instance;
mod labeler;
mod manager;
mod probe;
mod status_cache;

pub use instance::{
    ENV_CLUSTER_NAME, ENV_HOSTNAME, ENV_MULTI_MASTER, ENV_NAMESPACE, ENV_POD_IP,
    ENV_ROOT_PASSWORD, ENV_SEEDS, Instance, order_seeds,
};
pub use labeler::{PodRoleLabeler, PrimaryWorker, pod_name_for};
pub use manager::{ClusterManager, ManagerContext};
pub use probe::{LocalDatabase, MysqlAdminProbe};
pub use status_cache::{LivenessError, LivenessProbe, StatusCache};

use thiserror::Error;

use crate::innodb::{ShellError, TopologyError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("no cluster found on the local instance or any seed: {local}")]
    NoClusterFound {
        #[source]
        local: ShellError,
    },

    #[error("shell error: {0}")]
    Shell(#[from] ShellError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("invalid instance identity: {0}")]
    Identity(String),

    #[error("pod IP {0:?} is not in a private address range")]
    NonPrivateAddress(String),

    #[error("store error: {0}")]
    Store(#[from] crate::controller::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
