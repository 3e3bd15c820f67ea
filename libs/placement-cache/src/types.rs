//! Core data model: workloads, hosts, and their identities.
//!
//! Workloads and hosts arrive from the control plane's event stream; the
//! cache stores copies and never hands out live references. All types are
//! plain data with serde derives so they can travel through event payloads
//! and snapshots unchanged.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ports::ContainerPort;
use crate::resources::{RequestDefaults, Resource, ResourceSpec};

/// Stable identity of a workload: `namespace/name/uid`.
///
/// The uid disambiguates recreate cycles; two workloads with the same
/// namespace and name but different uids are distinct objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl WorkloadId {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.uid)
    }
}

/// Status of a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition reported for a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition kind, e.g. [`crate::resize::RESIZE_STATUS_CONDITION`].
    pub kind: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub message: String,
}

/// A container within a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceSpec,
    #[serde(default)]
    pub limits: ResourceSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
}

/// A unit of placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: String,

    /// Host assignment; `None` until the scheduler (or the control plane)
    /// has placed the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default)]
    pub containers: Vec<Container>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Opaque version token assigned by the control plane; newer events
    /// carry newer tokens but the cache only ever compares for equality.
    #[serde(default)]
    pub version: String,
}

impl Workload {
    /// The workload's identity key.
    pub fn id(&self) -> WorkloadId {
        WorkloadId::new(
            self.namespace.clone(),
            self.name.clone(),
            self.uid.clone(),
        )
    }

    /// Sum of all container requests, unspecified dimensions as zero.
    pub fn resource_request(&self) -> Resource {
        let mut total = Resource::default();
        for container in &self.containers {
            total.add_spec(&container.requests);
        }
        total
    }

    /// Sum of container requests with the configured defaults substituted
    /// for containers that declare no CPU or memory request. Scalar and
    /// ephemeral-storage requests are excluded; this aggregate only feeds
    /// CPU/memory balancing.
    pub fn non_zero_request(&self, defaults: &RequestDefaults) -> Resource {
        let mut total = Resource::default();
        for container in &self.containers {
            total.milli_cpu += container.requests.milli_cpu.unwrap_or(defaults.milli_cpu);
            total.memory_bytes += container
                .requests
                .memory_bytes
                .unwrap_or(defaults.memory_bytes);
        }
        total
    }

    /// All declared host ports across containers. Ports with a zero host
    /// port are unclaimed and skipped.
    pub fn host_ports(&self) -> impl Iterator<Item = &ContainerPort> {
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .filter(|p| p.host_port != 0)
    }

    /// Look up a status condition by kind.
    pub fn condition(&self, kind: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Container lookup by name.
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Effect of a host taint on scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A taint on a host, repelling workloads that do not tolerate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

/// Authoritative record of a host, fed by host add/update events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,

    /// Total resources schedulable on this host.
    #[serde(default)]
    pub allocatable: Resource,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Sizes in bytes of the images already present on the host, keyed by
    /// image reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub image_sizes: BTreeMap<String, i64>,
}
