//! Resource accounting primitives.
//!
//! Two layers:
//!
//! - [`ResourceSpec`] is a *partial* per-container requirement: every
//!   dimension is optional, mirroring what a manifest actually declares.
//!   It is also the wire format of the resize request/previous payloads.
//! - [`Resource`] is an aggregate total with every dimension present,
//!   used for per-host sums and admission arithmetic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource-list key for CPU, counted in millicores.
pub const RESOURCE_CPU: &str = "cpu";
/// Resource-list key for memory, counted in bytes.
pub const RESOURCE_MEMORY: &str = "memory";
/// Resource-list key for ephemeral storage, counted in bytes.
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Substitute requests used by the non-zero aggregate for containers that
/// declare no CPU or memory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDefaults {
    /// Default CPU request in millicores.
    pub milli_cpu: i64,
    /// Default memory request in bytes.
    pub memory_bytes: i64,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            milli_cpu: 100,
            memory_bytes: 200 * 1024 * 1024,
        }
    }
}

/// A partial set of resource requirements, as declared on a container.
///
/// `None` means "not specified", which is significant: it drives both the
/// non-zero default substitution and QoS classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milli_cpu: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_bytes: Option<i64>,

    /// Named scalar resources (device counts, license slots, ...).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, i64>,
}

impl ResourceSpec {
    /// True if no dimension is specified.
    pub fn is_empty(&self) -> bool {
        self.milli_cpu.is_none()
            && self.memory_bytes.is_none()
            && self.ephemeral_bytes.is_none()
            && self.scalars.is_empty()
    }

    /// Overlay the dimensions `other` specifies onto `self`, leaving
    /// unspecified dimensions untouched. This is the structured-patch
    /// primitive used by resize merge and rollback.
    pub fn merge_from(&mut self, other: &ResourceSpec) {
        if other.milli_cpu.is_some() {
            self.milli_cpu = other.milli_cpu;
        }
        if other.memory_bytes.is_some() {
            self.memory_bytes = other.memory_bytes;
        }
        if other.ephemeral_bytes.is_some() {
            self.ephemeral_bytes = other.ephemeral_bytes;
        }
        for (name, qty) in &other.scalars {
            self.scalars.insert(name.clone(), *qty);
        }
    }
}

/// An aggregate resource total. Unlike [`ResourceSpec`] every dimension is
/// present; unspecified container dimensions contribute zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub milli_cpu: i64,
    pub memory_bytes: i64,
    pub ephemeral_bytes: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, i64>,
}

impl Resource {
    /// Coordinate-wise addition.
    pub fn add(&mut self, other: &Resource) {
        self.milli_cpu += other.milli_cpu;
        self.memory_bytes += other.memory_bytes;
        self.ephemeral_bytes += other.ephemeral_bytes;
        for (name, qty) in &other.scalars {
            *self.scalars.entry(name.clone()).or_insert(0) += qty;
        }
    }

    /// Coordinate-wise subtraction. The minuend must be component-wise
    /// greater or equal; anything else means the caller's add/remove
    /// bookkeeping is broken.
    ///
    /// # Panics
    ///
    /// Panics if any component would go negative.
    pub fn sub(&mut self, other: &Resource) {
        self.milli_cpu = checked_sub(RESOURCE_CPU, self.milli_cpu, other.milli_cpu);
        self.memory_bytes = checked_sub(RESOURCE_MEMORY, self.memory_bytes, other.memory_bytes);
        self.ephemeral_bytes = checked_sub(
            RESOURCE_EPHEMERAL_STORAGE,
            self.ephemeral_bytes,
            other.ephemeral_bytes,
        );
        for (name, qty) in &other.scalars {
            let have = self.scalars.entry(name.clone()).or_insert(0);
            *have = checked_sub(name, *have, *qty);
        }
        // Zeroed scalars drop out so that add-then-sub restores the
        // original map byte for byte.
        self.scalars.retain(|_, qty| *qty != 0);
    }

    /// Add a container-level spec, treating unspecified dimensions as zero.
    pub fn add_spec(&mut self, spec: &ResourceSpec) {
        self.milli_cpu += spec.milli_cpu.unwrap_or(0);
        self.memory_bytes += spec.memory_bytes.unwrap_or(0);
        self.ephemeral_bytes += spec.ephemeral_bytes.unwrap_or(0);
        for (name, qty) in &spec.scalars {
            *self.scalars.entry(name.clone()).or_insert(0) += qty;
        }
    }

    /// True if every component of `other` fits within `self`. Scalars
    /// missing from `self` count as zero.
    pub fn covers(&self, other: &Resource) -> bool {
        if self.milli_cpu < other.milli_cpu
            || self.memory_bytes < other.memory_bytes
            || self.ephemeral_bytes < other.ephemeral_bytes
        {
            return false;
        }
        other
            .scalars
            .iter()
            .all(|(name, qty)| self.scalars.get(name).copied().unwrap_or(0) >= *qty)
    }

    /// Flatten into a resource list keyed by the well-known names plus
    /// scalar names.
    pub fn to_list(&self) -> BTreeMap<String, i64> {
        let mut list = BTreeMap::new();
        list.insert(RESOURCE_CPU.to_string(), self.milli_cpu);
        list.insert(RESOURCE_MEMORY.to_string(), self.memory_bytes);
        list.insert(RESOURCE_EPHEMERAL_STORAGE.to_string(), self.ephemeral_bytes);
        for (name, qty) in &self.scalars {
            list.insert(name.clone(), *qty);
        }
        list
    }

    /// Rebuild from a resource list. Unknown names are preserved as
    /// scalar resources.
    pub fn from_list(list: &BTreeMap<String, i64>) -> Self {
        let mut res = Resource::default();
        for (name, qty) in list {
            match name.as_str() {
                RESOURCE_CPU => res.milli_cpu = *qty,
                RESOURCE_MEMORY => res.memory_bytes = *qty,
                RESOURCE_EPHEMERAL_STORAGE => res.ephemeral_bytes = *qty,
                _ => {
                    res.scalars.insert(name.clone(), *qty);
                }
            }
        }
        res
    }
}

fn checked_sub(dimension: &str, have: i64, take: i64) -> i64 {
    assert!(
        have >= take,
        "resource accounting underflow on '{dimension}': {have} - {take}"
    );
    have - take
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cpu: Option<i64>, mem: Option<i64>) -> ResourceSpec {
        ResourceSpec {
            milli_cpu: cpu,
            memory_bytes: mem,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_sub_round_trip() {
        let mut total = Resource {
            milli_cpu: 300,
            memory_bytes: 1024,
            ephemeral_bytes: 0,
            scalars: BTreeMap::from([("example.com/foo".to_string(), 3)]),
        };
        let snapshot = total.clone();

        let delta = Resource {
            milli_cpu: 100,
            memory_bytes: 512,
            ephemeral_bytes: 0,
            scalars: BTreeMap::from([("example.com/foo".to_string(), 2)]),
        };
        total.add(&delta);
        total.sub(&delta);

        assert_eq!(total, snapshot);
    }

    #[test]
    fn test_sub_drops_zeroed_scalars() {
        let mut total = Resource::default();
        let delta = Resource {
            scalars: BTreeMap::from([("example.com/foo".to_string(), 5)]),
            ..Default::default()
        };
        total.add(&delta);
        total.sub(&delta);
        assert!(total.scalars.is_empty());
        assert_eq!(total, Resource::default());
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_sub_underflow_panics() {
        let mut total = Resource {
            milli_cpu: 100,
            ..Default::default()
        };
        total.sub(&Resource {
            milli_cpu: 200,
            ..Default::default()
        });
    }

    #[test]
    fn test_add_spec_treats_missing_as_zero() {
        let mut total = Resource::default();
        total.add_spec(&spec(Some(250), None));
        assert_eq!(total.milli_cpu, 250);
        assert_eq!(total.memory_bytes, 0);
    }

    #[test]
    fn test_merge_from_overlays_only_specified() {
        let mut current = spec(Some(2000), Some(3 << 30));
        current.scalars.insert("example.com/foo".to_string(), 1);

        current.merge_from(&spec(Some(4000), None));
        assert_eq!(current.milli_cpu, Some(4000));
        assert_eq!(current.memory_bytes, Some(3 << 30));
        assert_eq!(current.scalars.get("example.com/foo"), Some(&1));
    }

    #[test]
    fn test_covers_with_scalars() {
        let have = Resource {
            milli_cpu: 1000,
            memory_bytes: 2000,
            scalars: BTreeMap::from([("foo".to_string(), 1)]),
            ..Default::default()
        };
        let mut want = Resource {
            milli_cpu: 800,
            memory_bytes: 2000,
            ..Default::default()
        };
        assert!(have.covers(&want));

        want.scalars.insert("bar".to_string(), 1);
        assert!(!have.covers(&want));
    }

    #[test]
    fn test_list_round_trip() {
        let res = Resource {
            milli_cpu: 100,
            memory_bytes: 500,
            ephemeral_bytes: 42,
            scalars: BTreeMap::from([("example.com/foo".to_string(), 8)]),
        };
        assert_eq!(Resource::from_list(&res.to_list()), res);
    }

    #[test]
    fn test_spec_wire_format_is_sparse() {
        let json = serde_json::to_string(&spec(Some(4000), None)).unwrap();
        assert_eq!(json, r#"{"milli_cpu":4000}"#);

        let parsed: ResourceSpec = serde_json::from_str(r#"{"memory_bytes":1024}"#).unwrap();
        assert_eq!(parsed, spec(None, Some(1024)));
    }
}
