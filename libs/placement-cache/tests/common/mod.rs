//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use placement_cache::{
    Container, ContainerPort, Host, Protocol, Resource, ResourceSpec, Workload,
};

pub const GIB: i64 = 1 << 30;

/// A single-container workload with the given requests and host ports.
pub fn base_workload(
    host: &str,
    name: &str,
    milli_cpu: i64,
    memory_bytes: i64,
    ports: &[(Protocol, &str, u16)],
) -> Workload {
    Workload {
        namespace: "cache-test".to_string(),
        name: name.to_string(),
        uid: name.to_string(),
        host: Some(host.to_string()),
        containers: vec![Container {
            name: "main".to_string(),
            requests: ResourceSpec {
                milli_cpu: Some(milli_cpu),
                memory_bytes: Some(memory_bytes),
                ..Default::default()
            },
            ports: ports
                .iter()
                .map(|(protocol, ip, port)| ContainerPort {
                    protocol: *protocol,
                    host_ip: ip.to_string(),
                    host_port: *port,
                })
                .collect(),
            ..Default::default()
        }],
        version: "1".to_string(),
        ..Default::default()
    }
}

/// A container with explicit (cpu, memory) requests and limits; `None`
/// leaves the dimension undeclared.
pub fn container(
    name: &str,
    requests: (Option<i64>, Option<i64>),
    limits: (Option<i64>, Option<i64>),
) -> Container {
    Container {
        name: name.to_string(),
        requests: ResourceSpec {
            milli_cpu: requests.0,
            memory_bytes: requests.1,
            ..Default::default()
        },
        limits: ResourceSpec {
            milli_cpu: limits.0,
            memory_bytes: limits.1,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A host with the given allocatable CPU and memory.
pub fn host(name: &str, milli_cpu: i64, memory_bytes: i64) -> Host {
    Host {
        name: name.to_string(),
        allocatable: Resource {
            milli_cpu,
            memory_bytes,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
