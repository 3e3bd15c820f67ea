//! In-place vertical resize protocol.
//!
//! Resizing is driven entirely through annotations on workload updates so
//! that the control plane, the scheduler, and the host agent can coordinate
//! without a dedicated API:
//!
//! - The requesting controller attaches a *request* (desired per-container
//!   resources) and a *policy*.
//! - On the next update the cache admits the request against the host,
//!   applies it in place when allowed, records the pre-resize values under
//!   the *previous* annotation, and publishes its verdict as an *action*.
//! - The host agent acknowledges asynchronously through a status condition
//!   whose message carries the *action-version* token; a negative ack rolls
//!   the containers back from *previous*.
//!
//! The rollback is a structured patch: only the fields captured in
//! *previous* are restored, everything else keeps its current value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::host_info::HostInfo;
use crate::resources::{Resource, ResourceSpec};
use crate::types::{ConditionStatus, Container, Workload};

/// Annotation carrying the desired per-container resources, as a JSON array
/// of [`ResizeContainer`].
pub const RESIZE_REQUEST_ANNOTATION: &str = "resize.scheduler/request";

/// Annotation selecting the resize policy; see [`ResizePolicy`].
pub const RESIZE_POLICY_ANNOTATION: &str = "resize.scheduler/policy";

/// Annotation through which the cache publishes its verdict; see
/// [`ResizeAction`].
pub const RESIZE_ACTION_ANNOTATION: &str = "resize.scheduler/action";

/// Annotation correlating asynchronous acknowledgements with the update
/// that performed the resize.
pub const RESIZE_ACTION_VERSION_ANNOTATION: &str = "resize.scheduler/action-version";

/// Annotation holding the pre-resize resources for rollback, as a JSON
/// object keyed by container name.
pub const RESIZE_PREVIOUS_ANNOTATION: &str = "resize.scheduler/previous";

/// Condition kind through which the host agent acknowledges a resize.
pub const RESIZE_STATUS_CONDITION: &str = "ResourcesResizeStatus";

/// How a workload wants its resize handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizePolicy {
    /// Resize in place when the host can fit it, reschedule otherwise.
    #[default]
    InPlacePreferred,
    /// Resize in place or not at all.
    InPlaceOnly,
    /// Always reschedule.
    Restart,
}

impl ResizePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "InPlacePreferred" => Some(Self::InPlacePreferred),
            "InPlaceOnly" => Some(Self::InPlaceOnly),
            "Restart" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InPlacePreferred => "InPlacePreferred",
            Self::InPlaceOnly => "InPlaceOnly",
            Self::Restart => "Restart",
        }
    }
}

/// The cache's verdict on a resize request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAction {
    /// The workload was resized in place; awaiting acknowledgement.
    Update,
    /// The in-place resize was acknowledged (or rolled back) and is final.
    UpdateDone,
    /// The workload must be deleted and rescheduled to resize.
    Delete,
    /// The resize was refused because policy forbids rescheduling.
    NotResized,
}

impl ResizeAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UpdatePodForResizing" => Some(Self::Update),
            "UpdatePodForResizingDone" => Some(Self::UpdateDone),
            "DeletePodForResizing" => Some(Self::Delete),
            "PodNotResizedDueToPolicy" => Some(Self::NotResized),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "UpdatePodForResizing",
            Self::UpdateDone => "UpdatePodForResizingDone",
            Self::Delete => "DeletePodForResizing",
            Self::NotResized => "PodNotResizedDueToPolicy",
        }
    }
}

/// QoS class of a workload, derived from its containers' CPU and memory
/// requirements. In-place resizing must not change the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

/// Classify a container set.
///
/// Guaranteed requires every container to carry CPU and memory limits with
/// requests either omitted or equal to the limits; best-effort means no
/// container declares any CPU or memory requirement at all.
pub fn qos_class(containers: &[Container]) -> QosClass {
    let mut best_effort = true;
    let mut guaranteed = true;

    for c in containers {
        let declared = c.requests.milli_cpu.is_some()
            || c.requests.memory_bytes.is_some()
            || c.limits.milli_cpu.is_some()
            || c.limits.memory_bytes.is_some();
        if declared {
            best_effort = false;
        }

        let cpu_ok = matches!(
            (c.requests.milli_cpu, c.limits.milli_cpu),
            (Some(req), Some(lim)) if req == lim
        ) || (c.requests.milli_cpu.is_none() && c.limits.milli_cpu.is_some());
        let mem_ok = matches!(
            (c.requests.memory_bytes, c.limits.memory_bytes),
            (Some(req), Some(lim)) if req == lim
        ) || (c.requests.memory_bytes.is_none() && c.limits.memory_bytes.is_some());
        if !(cpu_ok && mem_ok) {
            guaranteed = false;
        }
    }

    if best_effort {
        QosClass::BestEffort
    } else if guaranteed {
        QosClass::Guaranteed
    } else {
        QosClass::Burstable
    }
}

/// Desired requests and limits for one container. Wire format of both the
/// request annotation (array entries) and the previous annotation (object
/// values).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeResources {
    #[serde(default, skip_serializing_if = "ResourceSpec::is_empty")]
    pub requests: ResourceSpec,
    #[serde(default, skip_serializing_if = "ResourceSpec::is_empty")]
    pub limits: ResourceSpec,
}

impl ResizeResources {
    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// One entry of the resize request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeContainer {
    pub name: String,
    #[serde(default)]
    pub resources: ResizeResources,
}

/// Desired resources keyed by container name.
pub(crate) type ResizeMap = BTreeMap<String, ResizeResources>;

/// Parse a resize request annotation against the workload's containers.
///
/// Returns the desired resources per container together with the projected
/// workload-level requests: per container and dimension, the larger of the
/// desired and current request. The projection is what admission must fit
/// on the host, since the resize transitions through the maximum.
pub(crate) fn parse_request(
    workload: &Workload,
    raw: &str,
) -> Result<(ResizeMap, Resource), CacheError> {
    let entries: Vec<ResizeContainer> = serde_json::from_str(raw)?;

    let mut map = ResizeMap::new();
    for entry in entries {
        if workload.container(&entry.name).is_none() {
            return Err(CacheError::Parse(format!(
                "resize request names unknown container '{}'",
                entry.name
            )));
        }
        map.insert(entry.name, entry.resources);
    }

    let mut projected = Resource::default();
    for container in &workload.containers {
        let desired = map.get(&container.name);
        let desired_req = desired.map(|d| &d.requests);

        projected.milli_cpu += max_dimension(
            container.requests.milli_cpu,
            desired_req.and_then(|r| r.milli_cpu),
        );
        projected.memory_bytes += max_dimension(
            container.requests.memory_bytes,
            desired_req.and_then(|r| r.memory_bytes),
        );
        projected.ephemeral_bytes += max_dimension(
            container.requests.ephemeral_bytes,
            desired_req.and_then(|r| r.ephemeral_bytes),
        );

        let mut scalar_names: Vec<&String> = container.requests.scalars.keys().collect();
        if let Some(req) = desired_req {
            scalar_names.extend(req.scalars.keys());
        }
        scalar_names.sort();
        scalar_names.dedup();
        for name in scalar_names {
            let current = container.requests.scalars.get(name).copied();
            let desired = desired_req.and_then(|r| r.scalars.get(name).copied());
            *projected.scalars.entry(name.clone()).or_insert(0) +=
                max_dimension(current, desired);
        }
    }

    Ok((map, projected))
}

fn max_dimension(current: Option<i64>, desired: Option<i64>) -> i64 {
    match (current, desired) {
        (Some(c), Some(d)) => c.max(d),
        (Some(c), None) => c,
        (None, Some(d)) => d,
        (None, None) => 0,
    }
}

/// Whether the projected requests fit on the host once everything already
/// placed there, except this workload's current footprint, is accounted.
fn fits_on_host(host: Option<&HostInfo>, current_request: &Resource, projected: &Resource) -> bool {
    let Some(info) = host else {
        return false;
    };
    let mut need = info.requested().clone();
    need.sub(current_request);
    need.add(projected);
    info.allocatable().covers(&need)
}

/// Capture the pre-resize values of exactly the fields the resize will
/// overwrite. Fields the container never declared are not captured; the
/// rollback patch leaves them at whatever the resize set.
fn capture_previous(containers: &[Container], map: &ResizeMap) -> BTreeMap<String, ResizeContainer> {
    let mut previous = BTreeMap::new();
    for (name, desired) in map {
        let Some(container) = containers.iter().find(|c| c.name == *name) else {
            continue;
        };
        let entry = ResizeContainer {
            name: name.clone(),
            resources: ResizeResources {
                requests: captured_fields(&container.requests, &desired.requests),
                limits: captured_fields(&container.limits, &desired.limits),
            },
        };
        if !entry.resources.is_empty() {
            previous.insert(name.clone(), entry);
        }
    }
    previous
}

fn captured_fields(current: &ResourceSpec, desired: &ResourceSpec) -> ResourceSpec {
    let mut captured = ResourceSpec::default();
    if desired.milli_cpu.is_some() {
        captured.milli_cpu = current.milli_cpu;
    }
    if desired.memory_bytes.is_some() {
        captured.memory_bytes = current.memory_bytes;
    }
    if desired.ephemeral_bytes.is_some() {
        captured.ephemeral_bytes = current.ephemeral_bytes;
    }
    for name in desired.scalars.keys() {
        if let Some(qty) = current.scalars.get(name) {
            captured.scalars.insert(name.clone(), *qty);
        }
    }
    captured
}

/// Overlay desired resources onto the matching containers.
fn apply_resize(containers: &mut [Container], map: &ResizeMap) {
    for container in containers.iter_mut() {
        if let Some(desired) = map.get(&container.name) {
            container.requests.merge_from(&desired.requests);
            container.limits.merge_from(&desired.limits);
        }
    }
}

/// Apply a rollback patch parsed from the previous annotation.
fn apply_rollback(containers: &mut [Container], previous: &BTreeMap<String, ResizeContainer>) {
    for container in containers.iter_mut() {
        if let Some(entry) = previous.get(&container.name) {
            container.requests.merge_from(&entry.resources.requests);
            container.limits.merge_from(&entry.resources.limits);
        }
    }
}

fn set_verdict(workload: &mut Workload, action: ResizeAction) {
    workload.annotations.insert(
        RESIZE_ACTION_ANNOTATION.to_string(),
        action.as_str().to_string(),
    );
    workload.annotations.insert(
        RESIZE_ACTION_VERSION_ANNOTATION.to_string(),
        workload.version.clone(),
    );
}

/// True when the update carries an acknowledgement for the in-place resize
/// currently pending on this workload.
fn has_pending_ack(workload: &Workload) -> bool {
    let pending = workload
        .annotations
        .get(RESIZE_ACTION_ANNOTATION)
        .and_then(|v| ResizeAction::parse(v))
        == Some(ResizeAction::Update);
    if !pending {
        return false;
    }
    let Some(version) = workload.annotations.get(RESIZE_ACTION_VERSION_ANNOTATION) else {
        return false;
    };
    workload
        .condition(RESIZE_STATUS_CONDITION)
        .is_some_and(|c| c.message == *version)
}

/// Drive the resize state machine for one update. Mutates `new` in place:
/// containers when a resize applies or rolls back, annotations for the
/// verdict bookkeeping. `current_request` is the workload's footprint as
/// currently accounted on `host`.
///
/// A malformed request payload is logged and ignored; the surrounding
/// update proceeds as a plain update.
pub(crate) fn process_update(
    new: &mut Workload,
    current_request: &Resource,
    host: Option<&HostInfo>,
) {
    if has_pending_ack(new) {
        process_ack(new);
        return;
    }

    let Some(raw) = new.annotations.get(RESIZE_REQUEST_ANNOTATION).cloned() else {
        return;
    };

    let (map, projected) = match parse_request(new, &raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(workload = %new.id(), error = %err, "Ignoring malformed resize request");
            return;
        }
    };

    let policy = match new.annotations.get(RESIZE_POLICY_ANNOTATION) {
        None => ResizePolicy::default(),
        Some(value) => ResizePolicy::parse(value).unwrap_or_else(|| {
            warn!(workload = %new.id(), policy = %value, "Unknown resize policy, treating as InPlacePreferred");
            ResizePolicy::default()
        }),
    };

    if policy == ResizePolicy::Restart {
        set_verdict(new, ResizeAction::Delete);
        return;
    }

    let mut merged = new.containers.clone();
    apply_resize(&mut merged, &map);
    let qos_preserved = qos_class(&new.containers) == qos_class(&merged);
    let admitted = qos_preserved && fits_on_host(host, current_request, &projected);

    if admitted {
        let previous = capture_previous(&new.containers, &map);
        match serde_json::to_string(&previous) {
            Ok(json) => {
                new.annotations
                    .insert(RESIZE_PREVIOUS_ANNOTATION.to_string(), json);
            }
            Err(err) => {
                warn!(workload = %new.id(), error = %err, "Failed to encode rollback snapshot, refusing in-place resize");
                set_verdict(new, ResizeAction::Delete);
                return;
            }
        }
        new.containers = merged;
        set_verdict(new, ResizeAction::Update);
        debug!(workload = %new.id(), "Applied in-place resize");
    } else if policy == ResizePolicy::InPlaceOnly {
        set_verdict(new, ResizeAction::NotResized);
        debug!(workload = %new.id(), qos_preserved, "Resize refused by policy");
    } else {
        set_verdict(new, ResizeAction::Delete);
        debug!(workload = %new.id(), qos_preserved, "Resize requires reschedule");
    }
}

/// Handle an acknowledgement condition for a pending in-place resize.
fn process_ack(new: &mut Workload) {
    let Some(status) = new
        .condition(RESIZE_STATUS_CONDITION)
        .map(|c| c.status)
    else {
        return;
    };

    match status {
        ConditionStatus::True => {
            new.annotations.remove(RESIZE_PREVIOUS_ANNOTATION);
            new.annotations.insert(
                RESIZE_ACTION_ANNOTATION.to_string(),
                ResizeAction::UpdateDone.as_str().to_string(),
            );
            debug!(workload = %new.id(), "In-place resize acknowledged");
        }
        ConditionStatus::False => {
            if let Some(raw) = new.annotations.get(RESIZE_PREVIOUS_ANNOTATION).cloned() {
                match serde_json::from_str::<BTreeMap<String, ResizeContainer>>(&raw) {
                    Ok(previous) => apply_rollback(&mut new.containers, &previous),
                    Err(err) => {
                        warn!(workload = %new.id(), error = %err, "Malformed rollback snapshot, leaving resize state untouched");
                        return;
                    }
                }
            }
            new.annotations.remove(RESIZE_PREVIOUS_ANNOTATION);
            new.annotations.insert(
                RESIZE_ACTION_ANNOTATION.to_string(),
                ResizeAction::UpdateDone.as_str().to_string(),
            );
            debug!(workload = %new.id(), "In-place resize rolled back");
        }
        ConditionStatus::Unknown => {}
    }
}
