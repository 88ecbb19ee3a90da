//! Local member identity

use std::net::Ipv4Addr;

use super::{Error, Result};
use crate::innodb::MYSQL_DB_PORT;

pub const ENV_NAMESPACE: &str = "POD_NAMESPACE";
pub const ENV_CLUSTER_NAME: &str = "MYSQL_CLUSTER_NAME";
pub const ENV_HOSTNAME: &str = "HOSTNAME";
pub const ENV_POD_IP: &str = "MY_POD_IP";
pub const ENV_MULTI_MASTER: &str = "MYSQL_CLUSTER_MULTI_MASTER";
pub const ENV_SEEDS: &str = "REPLICATION_GROUP_SEEDS";
pub const ENV_ROOT_PASSWORD: &str = "MYSQL_ROOT_PASSWORD";

/// A member of the cluster, identified by its StatefulSet pod.
///
/// Pod `mysql-2` of StatefulSet `mysql` has parent name `mysql`, ordinal `2`
/// and instance name `mysql-2.mysql`, which is also the host part of its
/// topology address.
#[derive(Clone, PartialEq, Eq)]
pub struct Instance {
    pub namespace: String,
    pub cluster_name: String,
    pub parent_name: String,
    pub ordinal: u32,
    pub port: u16,
    pub multi_master: bool,
    pub ip: String,
    pub seeds: Vec<String>,
    root_password: String,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("namespace", &self.namespace)
            .field("cluster_name", &self.cluster_name)
            .field("parent_name", &self.parent_name)
            .field("ordinal", &self.ordinal)
            .field("port", &self.port)
            .field("multi_master", &self.multi_master)
            .field("ip", &self.ip)
            .field("seeds", &self.seeds)
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Read the identity from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the identity through `lookup`, which maps variable names to values
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Identity(format!("{} must be set", key)))
        };

        let hostname = required(ENV_HOSTNAME)?;
        let (parent_name, ordinal) = parse_pod_name(&hostname)?;

        let multi_master = lookup(ENV_MULTI_MASTER)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let seeds = lookup(ENV_SEEDS)
            .map(|v| parse_seeds(&v))
            .unwrap_or_default();

        Ok(Self {
            namespace: required(ENV_NAMESPACE)?,
            cluster_name: required(ENV_CLUSTER_NAME)?,
            parent_name,
            ordinal,
            port: MYSQL_DB_PORT,
            multi_master,
            ip: lookup(ENV_POD_IP).unwrap_or_default(),
            seeds,
            root_password: required(ENV_ROOT_PASSWORD)?,
        })
    }

    /// Identity of the member behind a group seed such as
    /// `mysql-1.mysql:13306`. Seeds listen on the group replication port, the
    /// returned instance uses the database port.
    pub fn from_seed(&self, seed: &str) -> Result<Self> {
        let host = seed_host(seed);
        let pod_name = host.split('.').next().unwrap_or_default();
        let (parent_name, ordinal) = parse_pod_name(pod_name)?;

        Ok(Self {
            namespace: self.namespace.clone(),
            cluster_name: self.cluster_name.clone(),
            parent_name,
            ordinal,
            port: MYSQL_DB_PORT,
            multi_master: self.multi_master,
            ip: String::new(),
            seeds: self.seeds.clone(),
            root_password: self.root_password.clone(),
        })
    }

    pub fn pod_name(&self) -> String {
        format!("{}-{}", self.parent_name, self.ordinal)
    }

    /// `<pod>.<parent>`, the host part of this member's topology address
    pub fn name(&self) -> String {
        format!("{}.{}", self.pod_name(), self.parent_name)
    }

    /// Connection URI for the administration shell
    pub fn shell_uri(&self) -> String {
        format!("root:{}@{}:{}", self.root_password, self.name(), self.port)
    }

    /// Connection URI for another member given its `host:port` address
    pub fn shell_uri_for(&self, address: &str) -> String {
        format!("root:{}@{}", self.root_password, address)
    }

    pub fn root_password(&self) -> &str {
        &self.root_password
    }

    /// Only the first pod may create or reboot the cluster
    pub fn is_bootstrap_member(&self) -> bool {
        self.ordinal == 0
    }

    /// The RFC 1918 block containing this pod's IP
    pub fn whitelist_cidr(&self) -> Result<&'static str> {
        let ip: Ipv4Addr = self
            .ip
            .parse()
            .map_err(|_| Error::NonPrivateAddress(self.ip.clone()))?;
        private_block(ip).ok_or_else(|| Error::NonPrivateAddress(self.ip.clone()))
    }
}

fn private_block(ip: Ipv4Addr) -> Option<&'static str> {
    match ip.octets() {
        [10, ..] => Some("10.0.0.0/8"),
        [172, b, ..] if (16..=31).contains(&b) => Some("172.16.0.0/12"),
        [192, 168, ..] => Some("192.168.0.0/16"),
        _ => None,
    }
}

fn parse_pod_name(pod_name: &str) -> Result<(String, u32)> {
    let (parent, ordinal) = pod_name
        .rsplit_once('-')
        .ok_or_else(|| Error::Identity(format!("pod name {:?} has no ordinal", pod_name)))?;
    let ordinal = ordinal
        .parse()
        .map_err(|_| Error::Identity(format!("pod name {:?} has no ordinal", pod_name)))?;
    if parent.is_empty() {
        return Err(Error::Identity(format!("pod name {:?} has no parent", pod_name)));
    }
    Ok((parent.to_string(), ordinal))
}

fn parse_seeds(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn seed_host(seed: &str) -> &str {
    seed.rsplit_once(':').map(|(host, _)| host).unwrap_or(seed)
}

fn is_self_seed(seed: &str, self_name: &str) -> bool {
    let host = seed_host(seed);
    host == self_name
        || host
            .strip_prefix(self_name)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Order in which seeds are queried for the cluster status.
///
/// The local member is always asked first through its own shell, so it is
/// removed here; the other seeds keep their configured order.
pub fn order_seeds(seeds: &[String], self_name: &str) -> Vec<String> {
    seeds
        .iter()
        .filter(|s| !is_self_seed(s, self_name))
        .cloned()
        .collect()
}
