//! # placement-cache
//!
//! In-memory placement cache consulted by the workload scheduler.
//!
//! The cache tracks where workloads are (or are about to be) placed and
//! keeps per-host aggregates the scheduler's predicates evaluate against.
//! It reconciles two sources of truth: the scheduler's own optimistic
//! placements ("assumed", expiring under a TTL once binding finishes) and
//! the authoritative add/update/remove stream from the control plane.
//!
//! ## Design Principles
//!
//! - One readers/writer lock over the whole state; every operation sees
//!   and leaves consistent per-host totals.
//! - Snapshots are deep copies. Holders may keep them indefinitely and
//!   check staleness cheaply through per-host generation stamps.
//! - The cache records intent and verdicts; it evaluates no policy and
//!   talks to no transport.
//!
//! ## Layout
//!
//! - [`cache`] — the state machine: assume/forget/add/update/remove,
//!   snapshots, expiry.
//! - [`host_info`] — per-host aggregates with generation stamping.
//! - [`resize`] — the annotation-driven in-place vertical resize protocol.
//! - [`budget`] — disruption-budget index for preemption and eviction.
//! - [`expiration`] — background sweep releasing stale assumptions.

pub mod budget;
pub mod cache;
pub mod error;
pub mod expiration;
pub mod host_info;
pub mod labels;
pub mod ports;
pub mod resize;
pub mod resources;
pub mod types;

pub use budget::{BudgetIndex, DisruptionBudget};
pub use cache::{CacheConfig, CacheSnapshot, PlacementCache};
pub use error::CacheError;
pub use expiration::ExpirationWorker;
pub use host_info::HostInfo;
pub use labels::{LabelRequirement, LabelSelector, SelectorOperator};
pub use ports::{ContainerPort, HostPortSet, Protocol, WILDCARD_IP};
pub use resize::{
    qos_class, QosClass, ResizeAction, ResizeContainer, ResizePolicy, ResizeResources,
    RESIZE_ACTION_ANNOTATION, RESIZE_ACTION_VERSION_ANNOTATION, RESIZE_POLICY_ANNOTATION,
    RESIZE_PREVIOUS_ANNOTATION, RESIZE_REQUEST_ANNOTATION, RESIZE_STATUS_CONDITION,
};
pub use resources::{RequestDefaults, Resource, ResourceSpec};
pub use types::{
    Condition, ConditionStatus, Container, Host, Taint, TaintEffect, Workload, WorkloadId,
};
