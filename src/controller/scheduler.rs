//! Member selection for backup and restore work
//!
//! Secondaries are preferred so the primary keeps serving writes. Candidates
//! are sorted by pod name, so repeated runs over the same pods pick the same
//! member.

use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::controller::store::ResourceStore;
use crate::crd::{ROLE_PRIMARY, ROLE_SECONDARY, role_selector};

/// Pick the member of `cluster` that should run the work
pub async fn schedule_member(
    store: &dyn ResourceStore,
    namespace: &str,
    cluster: &str,
) -> Result<String> {
    for role in [ROLE_SECONDARY, ROLE_PRIMARY] {
        let pods = store.list_pods(namespace, &role_selector(cluster, role)).await?;

        let mut names: Vec<String> = pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect();
        names.sort();

        if let Some(member) = names.into_iter().next() {
            debug!(cluster, role, member = %member, "Selected member");
            return Ok(member);
        }
    }

    Err(Error::NoPrimaryFound(cluster.to_string()))
}
