//! Per-host aggregate view.
//!
//! A [`HostInfo`] is the scheduler's working summary of one host: the
//! workloads placed on it, their summed requests, the claimed host ports,
//! and the authoritative host record when one has been observed.
//!
//! # Invariants
//!
//! - `requested` equals the sum of requests over placed workloads.
//! - `non_zero_requested` is the same sum with defaults substituted for
//!   containers that declare no CPU/memory request.
//! - `ports` is the multiset union of the placed workloads' host ports.
//! - `generation` strictly increases on every mutation; stamps are drawn
//!   from a process-wide counter so any two snapshots are comparable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CacheError;
use crate::ports::HostPortSet;
use crate::resources::{RequestDefaults, Resource};
use crate::types::{Host, Taint, Workload, WorkloadId};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Draw a fresh generation stamp. Stamps are unique and monotonically
/// increasing across all hosts in the process.
fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed) + 1
}

/// Aggregated scheduling state of a single host.
#[derive(Debug, Clone)]
pub struct HostInfo {
    name: String,
    host: Option<Host>,

    requested: Resource,
    non_zero_requested: Resource,
    allocatable: Resource,

    workloads: Vec<Workload>,
    ports: HostPortSet,
    taints: Vec<Taint>,
    image_sizes: BTreeMap<String, i64>,

    defaults: RequestDefaults,
    generation: u64,
}

impl HostInfo {
    pub fn new(name: impl Into<String>, defaults: RequestDefaults) -> Self {
        Self {
            name: name.into(),
            host: None,
            requested: Resource::default(),
            non_zero_requested: Resource::default(),
            allocatable: Resource::default(),
            workloads: Vec::new(),
            ports: HostPortSet::new(),
            taints: Vec::new(),
            image_sizes: BTreeMap::new(),
            defaults,
            generation: next_generation(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The authoritative host record, if one has been observed.
    pub fn host(&self) -> Option<&Host> {
        self.host.as_ref()
    }

    pub fn requested(&self) -> &Resource {
        &self.requested
    }

    pub fn non_zero_requested(&self) -> &Resource {
        &self.non_zero_requested
    }

    pub fn allocatable(&self) -> &Resource {
        &self.allocatable
    }

    /// Placed workloads in arrival order.
    pub fn workloads(&self) -> &[Workload] {
        &self.workloads
    }

    pub fn ports(&self) -> &HostPortSet {
        &self.ports
    }

    pub fn taints(&self) -> &[Taint] {
        &self.taints
    }

    pub fn image_sizes(&self) -> &BTreeMap<String, i64> {
        &self.image_sizes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when nothing backs this entry: no placed workloads and no host
    /// record. Discardable infos are deleted by the cache.
    pub fn is_discardable(&self) -> bool {
        self.workloads.is_empty() && self.host.is_none()
    }

    /// Install or refresh the authoritative host record.
    pub fn set_host(&mut self, host: Host) {
        self.allocatable = host.allocatable.clone();
        self.taints = host.taints.clone();
        self.image_sizes = host.image_sizes.clone();
        self.host = Some(host);
        self.generation = next_generation();
    }

    /// Place a workload on this host and fold its requests and ports into
    /// the aggregates. The caller guarantees the identity is not already
    /// placed here.
    pub fn add_workload(&mut self, workload: Workload) {
        self.apply_add(&workload);
        self.workloads.push(workload);
        self.generation = next_generation();
    }

    /// Remove a placed workload and withdraw its contribution.
    pub fn remove_workload(&mut self, id: &WorkloadId) -> Result<Workload, CacheError> {
        let index = self
            .workloads
            .iter()
            .position(|w| w.id() == *id)
            .ok_or_else(|| CacheError::NotFound(id.clone()))?;
        let removed = self.workloads.remove(index);
        self.apply_sub(&removed);
        self.generation = next_generation();
        Ok(removed)
    }

    /// Replace a placed workload with a new revision in one step, bumping
    /// the generation once.
    pub fn update_workload(&mut self, id: &WorkloadId, new: Workload) -> Result<(), CacheError> {
        let index = self
            .workloads
            .iter()
            .position(|w| w.id() == *id)
            .ok_or_else(|| CacheError::NotFound(id.clone()))?;
        let old = self.workloads.remove(index);
        self.apply_sub(&old);
        self.apply_add(&new);
        self.workloads.push(new);
        self.generation = next_generation();
        Ok(())
    }

    fn apply_add(&mut self, workload: &Workload) {
        self.requested.add(&workload.resource_request());
        self.non_zero_requested
            .add(&workload.non_zero_request(&self.defaults));
        for port in workload.host_ports() {
            self.ports.add(port.protocol, &port.host_ip, port.host_port);
        }
    }

    fn apply_sub(&mut self, workload: &Workload) {
        self.requested.sub(&workload.resource_request());
        self.non_zero_requested
            .sub(&workload.non_zero_request(&self.defaults));
        for port in workload.host_ports() {
            self.ports
                .remove(port.protocol, &port.host_ip, port.host_port);
        }
    }
}
