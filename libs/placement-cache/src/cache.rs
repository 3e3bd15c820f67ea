//! The placement cache core.
//!
//! The cache reconciles two sources of truth:
//!
//! - *Assumed* placements: decisions the scheduler has made locally but the
//!   control plane has not yet confirmed. They are an intent log that is
//!   either discarded (forget), confirmed (authoritative add), or expired
//!   under a TTL once binding has finished.
//! - *Bound* placements: the authoritative event stream (add/update/remove).
//!
//! Every transition updates the per-host aggregates so that snapshot reads
//! always see totals equal to the sum of the placed workloads.
//!
//! All state lives behind a single readers/writer lock: aggregate
//! arithmetic and port bookkeeping must be atomic per call, and the
//! scheduler's hot path must read consistent per-host totals.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::budget::{BudgetIndex, DisruptionBudget};
use crate::error::CacheError;
use crate::host_info::HostInfo;
use crate::labels::LabelSelector;
use crate::resize;
use crate::resources::RequestDefaults;
use crate::types::{Host, Workload, WorkloadId};

/// Construction-time configuration of the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a finished binding may stay unconfirmed before the
    /// assumption expires.
    pub ttl: Duration,

    /// Period of the background expiry sweep.
    pub cleanup_period: Duration,

    /// Defaults substituted into the non-zero request aggregate for
    /// containers that declare no CPU or memory request.
    pub defaults: RequestDefaults,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            cleanup_period: Duration::from_secs(1),
            defaults: RequestDefaults::default(),
        }
    }
}

/// Tracked state of a single workload.
#[derive(Debug, Clone)]
struct WorkloadState {
    /// The cached copy; for assumed workloads this carries the assumed
    /// host, for bound workloads the authoritative one.
    workload: Workload,

    /// Whether the scheduler has finished binding this assumption. Only
    /// finished assumptions carry a deadline and may expire.
    binding_finished: bool,

    /// When the assumption expires.
    deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CacheState {
    workloads: HashMap<WorkloadId, WorkloadState>,
    assumed: HashSet<WorkloadId>,
    hosts: HashMap<String, HostInfo>,
    budgets: BudgetIndex,
}

impl CacheState {
    /// Account a workload on its host, creating the host entry on demand.
    fn place(&mut self, workload: Workload, defaults: RequestDefaults) -> Result<(), CacheError> {
        let host = workload
            .host
            .clone()
            .ok_or_else(|| CacheError::MissingHost(workload.id()))?;
        let info = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| HostInfo::new(host, defaults));
        info.add_workload(workload);
        Ok(())
    }

    /// Withdraw a workload's contribution from its host, deleting the host
    /// entry once nothing backs it.
    fn displace(&mut self, workload: &Workload) -> Result<Workload, CacheError> {
        let id = workload.id();
        let host = workload
            .host
            .clone()
            .ok_or_else(|| CacheError::MissingHost(id.clone()))?;
        let info = self.hosts.get_mut(&host).ok_or_else(|| {
            CacheError::Invariant(format!("workload {id} accounted on unknown host '{host}'"))
        })?;
        let removed = info.remove_workload(&id)?;
        if info.is_discardable() {
            self.hosts.remove(&host);
        }
        Ok(removed)
    }
}

/// Deep-copied view of the cache, safe to keep across scheduling cycles.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    /// Per-host aggregates at capture time.
    pub hosts: HashMap<String, HostInfo>,

    /// Identities whose placement was assumed but not yet confirmed.
    pub assumed: HashSet<WorkloadId>,
}

/// The scheduler-side placement cache.
///
/// Shared between the scheduler's hot path, the event-delivery task, and
/// the expiration worker; all methods take `&self`.
#[derive(Debug)]
pub struct PlacementCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl PlacementCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.config.ttl.as_millis() as i64)
    }

    /// Record the scheduler's decision to place `workload` on its chosen
    /// host, ahead of control-plane confirmation. The workload immediately
    /// counts against the host's aggregates.
    pub async fn assume_workload(&self, workload: Workload) -> Result<(), CacheError> {
        let id = workload.id();
        if workload.host.is_none() {
            return Err(CacheError::MissingHost(id));
        }

        let mut state = self.state.write().await;
        if state.workloads.contains_key(&id) {
            return Err(CacheError::AlreadyPresent(id));
        }

        state.place(workload.clone(), self.config.defaults)?;
        state.workloads.insert(
            id.clone(),
            WorkloadState {
                workload,
                binding_finished: false,
                deadline: None,
            },
        );
        debug!(workload = %id, "Assumed workload");
        state.assumed.insert(id);
        Ok(())
    }

    /// Mark an assumed workload's binding as finished, starting its expiry
    /// clock. No-op for unknown, bound, or already-finished workloads.
    pub async fn finish_binding(&self, workload: &Workload) {
        self.finish_binding_at(workload, Utc::now()).await;
    }

    /// [`Self::finish_binding`] with an explicit clock, for deterministic
    /// callers.
    pub async fn finish_binding_at(&self, workload: &Workload, now: DateTime<Utc>) {
        let id = workload.id();
        let ttl = self.ttl();

        let mut state = self.state.write().await;
        if !state.assumed.contains(&id) {
            return;
        }
        if let Some(st) = state.workloads.get_mut(&id) {
            if !st.binding_finished {
                let deadline = now + ttl;
                st.binding_finished = true;
                st.deadline = Some(deadline);
                debug!(workload = %id, deadline = %deadline, "Finished binding");
            }
        }
    }

    /// Discard an assumption, restoring the host to its prior aggregates.
    pub async fn forget_workload(&self, workload: &Workload) -> Result<(), CacheError> {
        let id = workload.id();
        let mut state = self.state.write().await;

        let cached = match state.workloads.get(&id) {
            None => return Err(CacheError::NotFound(id)),
            Some(st) => st.workload.clone(),
        };
        if !state.assumed.contains(&id) {
            return Err(CacheError::NotAssumed(id));
        }
        if cached.host != workload.host {
            return Err(CacheError::HostMismatch {
                id,
                cached: cached.host.unwrap_or_default(),
                actual: workload.host.clone().unwrap_or_default(),
            });
        }

        state.displace(&cached)?;
        state.workloads.remove(&id);
        state.assumed.remove(&id);
        debug!(workload = %id, "Forgot assumed workload");
        Ok(())
    }

    /// Apply an authoritative add. Confirms a pending assumption (moving
    /// the workload if the control plane placed it elsewhere) or binds a
    /// previously unknown workload.
    pub async fn add_workload(&self, workload: Workload) -> Result<(), CacheError> {
        let id = workload.id();
        if workload.host.is_none() {
            return Err(CacheError::MissingHost(id));
        }

        let mut state = self.state.write().await;
        let cached = state.workloads.get(&id).map(|st| st.workload.clone());

        match cached {
            None => {
                state.place(workload.clone(), self.config.defaults)?;
                state.workloads.insert(
                    id.clone(),
                    WorkloadState {
                        workload,
                        binding_finished: false,
                        deadline: None,
                    },
                );
                debug!(workload = %id, "Added workload");
            }
            Some(cached) => {
                if !state.assumed.contains(&id) {
                    return Err(CacheError::AlreadyBound(id));
                }
                if cached.host != workload.host {
                    // The control plane placed the workload somewhere else
                    // than assumed. Release the assumed host first so no
                    // aggregate ever counts the workload twice.
                    warn!(
                        workload = %id,
                        assumed_host = cached.host.as_deref().unwrap_or(""),
                        actual_host = workload.host.as_deref().unwrap_or(""),
                        "Assumed host differs from authoritative host"
                    );
                    state.displace(&cached)?;
                    state.place(workload.clone(), self.config.defaults)?;
                } else if let Some(host) = cached.host.as_deref() {
                    // Same host: swap in the authoritative copy so the
                    // aggregates track it rather than the assumed one.
                    if let Some(info) = state.hosts.get_mut(host) {
                        info.update_workload(&id, workload.clone())?;
                    }
                }
                state.assumed.remove(&id);
                if let Some(st) = state.workloads.get_mut(&id) {
                    st.workload = workload;
                    st.binding_finished = false;
                    st.deadline = None;
                }
                debug!(workload = %id, "Confirmed assumed workload");
            }
        }
        Ok(())
    }

    /// Apply an authoritative update to a bound workload, driving the
    /// resize protocol along the way. Returns the workload as finally
    /// cached (containers and annotations reflect any resize verdict).
    pub async fn update_workload(
        &self,
        old: &Workload,
        new: Workload,
    ) -> Result<Workload, CacheError> {
        let id = old.id();
        if new.id() != id {
            return Err(CacheError::Invariant(format!(
                "update changes workload identity: {} -> {}",
                id,
                new.id()
            )));
        }

        let mut state = self.state.write().await;
        let cached = match state.workloads.get(&id) {
            None => return Err(CacheError::NotFound(id)),
            Some(st) => st.workload.clone(),
        };
        if state.assumed.contains(&id) {
            return Err(CacheError::StillAssumed(id));
        }
        if new.host.is_none() {
            return Err(CacheError::MissingHost(id));
        }

        let mut new = new;
        let host_info = cached.host.as_deref().and_then(|h| state.hosts.get(h));
        resize::process_update(&mut new, &cached.resource_request(), host_info);

        if cached.host == new.host {
            if let Some(host) = cached.host.as_deref() {
                let info = state.hosts.get_mut(host).ok_or_else(|| {
                    CacheError::Invariant(format!(
                        "workload {id} accounted on unknown host '{host}'"
                    ))
                })?;
                info.update_workload(&id, new.clone())?;
            }
        } else {
            // Moving hosts: release the old host before claiming the new
            // one so no aggregate ever counts the workload twice.
            state.displace(&cached)?;
            state.place(new.clone(), self.config.defaults)?;
        }

        if let Some(st) = state.workloads.get_mut(&id) {
            st.workload = new.clone();
        }
        debug!(workload = %id, "Updated workload");
        Ok(new)
    }

    /// Apply an authoritative remove.
    pub async fn remove_workload(&self, workload: &Workload) -> Result<(), CacheError> {
        let id = workload.id();
        let mut state = self.state.write().await;

        let cached = match state.workloads.get(&id) {
            None => return Err(CacheError::NotFound(id)),
            Some(st) => st.workload.clone(),
        };
        state.displace(&cached)?;
        state.workloads.remove(&id);
        state.assumed.remove(&id);
        debug!(workload = %id, "Removed workload");
        Ok(())
    }

    /// The currently cached copy of a workload.
    pub async fn get_workload(&self, id: &WorkloadId) -> Result<Workload, CacheError> {
        let state = self.state.read().await;
        state
            .workloads
            .get(id)
            .map(|st| st.workload.clone())
            .ok_or_else(|| CacheError::NotFound(id.clone()))
    }

    /// Whether the identity is assumed and not yet confirmed.
    pub async fn is_assumed(&self, id: &WorkloadId) -> bool {
        self.state.read().await.assumed.contains(id)
    }

    /// All cached workloads whose labels match the selector.
    pub async fn list_workloads(&self, selector: &LabelSelector) -> Vec<Workload> {
        let state = self.state.read().await;
        state
            .workloads
            .values()
            .filter(|st| selector.matches(&st.workload.labels))
            .map(|st| st.workload.clone())
            .collect()
    }

    /// Number of cached workloads, assumed and bound.
    pub async fn workload_count(&self) -> usize {
        self.state.read().await.workloads.len()
    }

    /// Evict assumptions whose binding finished and whose deadline has
    /// passed. Unfinished assumptions never expire, regardless of age.
    /// Returns the number of evicted workloads; per-workload failures are
    /// logged and do not abort the sweep.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;

        let expired: Vec<WorkloadId> = state
            .assumed
            .iter()
            .filter(|id| match state.workloads.get(*id) {
                Some(st) => st.binding_finished && st.deadline.map_or(false, |d| d <= now),
                None => true,
            })
            .cloned()
            .collect();

        let mut evicted = 0;
        for id in expired {
            state.assumed.remove(&id);
            let Some(st) = state.workloads.remove(&id) else {
                warn!(workload = %id, "Assumed identity had no state; dropping");
                continue;
            };
            match state.displace(&st.workload) {
                Ok(_) => {
                    debug!(workload = %id, "Expired assumed workload");
                    evicted += 1;
                }
                Err(err) => {
                    warn!(workload = %id, error = %err, "Failed to release expired assumption");
                }
            }
        }
        evicted
    }

    /// Install or refresh a host record.
    pub async fn add_host(&self, host: Host) {
        let mut state = self.state.write().await;
        let defaults = self.config.defaults;
        let info = state
            .hosts
            .entry(host.name.clone())
            .or_insert_with(|| HostInfo::new(host.name.clone(), defaults));
        debug!(host = %host.name, "Setting host record");
        info.set_host(host);
    }

    /// Apply an updated host record.
    pub async fn update_host(&self, host: Host) {
        self.add_host(host).await;
    }

    /// Drop a host. No-op while workloads remain placed on it; callers
    /// retry once the host has drained.
    pub async fn remove_host(&self, name: &str) {
        let mut state = self.state.write().await;
        let occupied = match state.hosts.get(name) {
            None => return,
            Some(info) => info.workloads().len(),
        };
        if occupied == 0 {
            state.hosts.remove(name);
            debug!(host = %name, "Removed host");
        } else {
            debug!(host = %name, workloads = occupied, "Host removal deferred; workloads remain");
        }
    }

    pub async fn add_budget(&self, budget: DisruptionBudget) {
        self.state.write().await.budgets.add(budget);
    }

    pub async fn update_budget(&self, old: &DisruptionBudget, new: DisruptionBudget) {
        self.state.write().await.budgets.update(old, new);
    }

    pub async fn remove_budget(&self, budget: &DisruptionBudget) {
        self.state.write().await.budgets.remove(budget);
    }

    /// All budgets whose own labels match the selector.
    pub async fn list_budgets(&self, selector: &LabelSelector) -> Vec<DisruptionBudget> {
        self.state.read().await.budgets.list(selector)
    }

    /// Whether every disruption budget selecting this workload currently
    /// permits a disruption.
    pub async fn disruption_allowed(&self, workload: &Workload) -> bool {
        self.state.read().await.budgets.allows(workload)
    }

    /// Capture a deep-copied, consistent view of hosts and assumptions.
    pub async fn snapshot(&self) -> CacheSnapshot {
        let state = self.state.read().await;
        CacheSnapshot {
            hosts: state.hosts.clone(),
            assumed: state.assumed.clone(),
        }
    }

    /// Whether a snapshot host entry still matches the live cache. False
    /// once the host mutated or was deleted.
    pub async fn is_up_to_date(&self, info: &HostInfo) -> bool {
        let state = self.state.read().await;
        state
            .hosts
            .get(info.name())
            .map_or(false, |live| live.generation() == info.generation())
    }

    /// Reconcile a caller-owned host map against the live cache: stale
    /// entries (by generation) are replaced with fresh clones, deleted
    /// hosts are dropped. Cheap when little has changed.
    pub async fn refresh_host_map(&self, map: &mut HashMap<String, HostInfo>) {
        let state = self.state.read().await;
        for (name, live) in &state.hosts {
            let stale = map
                .get(name)
                .map_or(true, |have| have.generation() != live.generation());
            if stale {
                map.insert(name.clone(), live.clone());
            }
        }
        map.retain(|name, _| state.hosts.contains_key(name));
    }
}
