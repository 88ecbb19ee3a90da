//! Topology snapshot types
//!
//! A [`ClusterStatus`] is built fresh every time the shell is asked for the
//! status; nothing here is persisted. All data is owned, so `clone()` is a
//! full deep copy and a copy handed to a caller never aliases the holder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::MYSQL_DB_PORT;

/// Errors derived from a topology snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("cluster {0:?} does not have a primary")]
    NoPrimaryFound(String),
}

/// Membership status of one instance as reported by the shell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Online,
    Missing,
    Recovering,
    Unreachable,
    Error,
    /// The instance does not appear in the topology at all
    NotFound,
    /// Any status value the shell reports that we do not recognise
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Online => "ONLINE",
            InstanceStatus::Missing => "(MISSING)",
            InstanceStatus::Recovering => "RECOVERING",
            InstanceStatus::Unreachable => "UNREACHABLE",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::NotFound => "NOT_FOUND",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "ONLINE" => InstanceStatus::Online,
            "(MISSING)" | "MISSING" => InstanceStatus::Missing,
            "RECOVERING" => InstanceStatus::Recovering,
            "UNREACHABLE" => InstanceStatus::Unreachable,
            "ERROR" => InstanceStatus::Error,
            "NOT_FOUND" => InstanceStatus::NotFound,
            _ => InstanceStatus::Unknown,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InstanceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for InstanceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(InstanceStatus::parse(&s))
    }
}

/// Aggregate health of the replica set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ReplicaSetStatus {
    Ok,
    OkPartial,
    OkNoTolerance,
    NoQuorum,
    #[default]
    Unknown,
}

impl ReplicaSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicaSetStatus::Ok => "OK",
            ReplicaSetStatus::OkPartial => "OK_PARTIAL",
            ReplicaSetStatus::OkNoTolerance => "OK_NO_TOLERANCE",
            ReplicaSetStatus::NoQuorum => "NO_QUORUM",
            ReplicaSetStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ReplicaSetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ReplicaSetStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReplicaSetStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "OK" => ReplicaSetStatus::Ok,
            "OK_PARTIAL" => ReplicaSetStatus::OkPartial,
            "OK_NO_TOLERANCE" => ReplicaSetStatus::OkNoTolerance,
            "NO_QUORUM" => ReplicaSetStatus::NoQuorum,
            _ => ReplicaSetStatus::Unknown,
        })
    }
}

/// Replication mode of an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceMode {
    #[serde(rename = "R/W")]
    ReadWrite,
    #[serde(rename = "R/O")]
    ReadOnly,
}

/// One database process in the topology
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// `host:port` address
    pub address: String,
    pub mode: InstanceMode,
    #[serde(default)]
    pub role: String,
    pub status: InstanceStatus,
}

impl Instance {
    /// Host portion of the address
    pub fn name(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address)
    }
}

/// A named group of instances
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    pub name: String,
    /// Address of the primary; empty in multi-primary mode
    #[serde(default)]
    pub primary: String,
    pub status: ReplicaSetStatus,
    #[serde(default)]
    pub status_text: String,
    /// Instances keyed by address
    #[serde(default)]
    pub topology: BTreeMap<String, Instance>,
}

/// Top-level status snapshot returned by `cluster.status()`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub cluster_name: String,
    pub default_replica_set: ReplicaSet,
}

impl ClusterStatus {
    /// Status of the instance with the given host name, or `NotFound`
    pub fn get_instance_status(&self, name: &str) -> InstanceStatus {
        let key = format!("{}:{}", name, MYSQL_DB_PORT);
        self.default_replica_set
            .topology
            .get(&key)
            .map(|i| i.status)
            .unwrap_or(InstanceStatus::NotFound)
    }

    /// Address of the primary.
    ///
    /// In single-primary mode this is the replica set's `primary` field. In
    /// multi-primary mode the field is empty and the first read-write
    /// instance (in address order) is returned.
    pub fn get_primary_addr(&self) -> Result<String, TopologyError> {
        let rs = &self.default_replica_set;
        if !rs.primary.is_empty() {
            return Ok(rs.primary.clone());
        }

        rs.topology
            .iter()
            .find(|(_, inst)| inst.mode == InstanceMode::ReadWrite)
            .map(|(addr, _)| addr.clone())
            .ok_or_else(|| TopologyError::NoPrimaryFound(self.cluster_name.clone()))
    }

    /// Deep copy of this snapshot
    pub fn deep_copy(&self) -> ClusterStatus {
        self.clone()
    }
}

/// Verdict of `check_instance_state` for an instance outside the group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceState {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub state: String,
}

impl InstanceState {
    pub const REASON_RECOVERABLE: &'static str = "recoverable";
    pub const STATE_OK: &'static str = "ok";

    /// Whether the instance's transactions allow it to rejoin the group
    pub fn can_rejoin_cluster(&self) -> bool {
        self.state == Self::STATE_OK && self.reason == Self::REASON_RECOVERABLE
    }
}
