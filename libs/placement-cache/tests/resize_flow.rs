//! Scenario tests for the in-place resize protocol: admission, policy
//! dispatch, acknowledgement, and rollback, all driven through workload
//! updates the way an event source would deliver them.

mod common;

use std::collections::BTreeMap;

use placement_cache::{
    CacheConfig, Condition, ConditionStatus, PlacementCache, ResizeContainer, Workload,
    RESIZE_ACTION_ANNOTATION, RESIZE_ACTION_VERSION_ANNOTATION, RESIZE_POLICY_ANNOTATION,
    RESIZE_PREVIOUS_ANNOTATION, RESIZE_REQUEST_ANNOTATION, RESIZE_STATUS_CONDITION,
};

use common::{container, host, GIB};

fn resize_pod(containers: Vec<placement_cache::Container>) -> Workload {
    Workload {
        namespace: "resize-test".to_string(),
        name: "test".to_string(),
        uid: "test".to_string(),
        host: Some("node".to_string()),
        containers,
        version: "100".to_string(),
        ..Default::default()
    }
}

/// Next revision of `from`, carrying a resize request and policy.
fn with_resize_request(from: &Workload, version: &str, policy: &str, request: &str) -> Workload {
    let mut next = from.clone();
    next.version = version.to_string();
    next.annotations
        .insert(RESIZE_POLICY_ANNOTATION.to_string(), policy.to_string());
    next.annotations
        .insert(RESIZE_REQUEST_ANNOTATION.to_string(), request.to_string());
    next
}

/// Next revision of `from`, carrying a resize acknowledgement condition.
fn with_ack(from: &Workload, version: &str, status: ConditionStatus) -> Workload {
    let mut next = from.clone();
    next.version = version.to_string();
    let acked_version = from
        .annotations
        .get(RESIZE_ACTION_VERSION_ANNOTATION)
        .cloned()
        .expect("pending resize carries an action version");
    next.conditions = vec![Condition {
        kind: RESIZE_STATUS_CONDITION.to_string(),
        status,
        message: acked_version,
    }];
    next
}

fn action_of(w: &Workload) -> Option<&str> {
    w.annotations.get(RESIZE_ACTION_ANNOTATION).map(|s| s.as_str())
}

async fn guaranteed_pod_cache() -> (PlacementCache, Workload) {
    let cache = PlacementCache::new(CacheConfig::default());
    cache.add_host(host("node", 8000, 8 * GIB)).await;
    let pod = resize_pod(vec![container(
        "c1",
        (Some(2000), Some(3 * GIB)),
        (Some(2000), Some(3 * GIB)),
    )]);
    cache.add_workload(pod.clone()).await.unwrap();
    (cache, pod)
}

#[tokio::test]
async fn test_in_place_resize_success() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let request = format!(
        r#"[{{"name":"c1","resources":{{"requests":{{"milli_cpu":4000,"memory_bytes":{mem}}},"limits":{{"milli_cpu":4000,"memory_bytes":{mem}}}}}}}]"#,
        mem = 6 * GIB
    );
    let update = with_resize_request(&pod, "101", "InPlacePreferred", &request);
    let resized = cache.update_workload(&pod, update).await.unwrap();

    assert_eq!(action_of(&resized), Some("UpdatePodForResizing"));
    assert_eq!(
        resized.annotations.get(RESIZE_ACTION_VERSION_ANNOTATION),
        Some(&"101".to_string())
    );
    assert_eq!(resized.containers[0].requests.milli_cpu, Some(4000));
    assert_eq!(resized.containers[0].requests.memory_bytes, Some(6 * GIB));
    assert_eq!(resized.containers[0].limits.milli_cpu, Some(4000));

    // The rollback snapshot holds the pre-resize values.
    let previous: BTreeMap<String, ResizeContainer> = serde_json::from_str(
        resized.annotations.get(RESIZE_PREVIOUS_ANNOTATION).unwrap(),
    )
    .unwrap();
    assert_eq!(previous["c1"].resources.requests.milli_cpu, Some(2000));
    assert_eq!(previous["c1"].resources.requests.memory_bytes, Some(3 * GIB));
    assert_eq!(previous["c1"].resources.limits.milli_cpu, Some(2000));

    // Host aggregates follow the resized values.
    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.hosts["node"].requested().milli_cpu, 4000);
    assert_eq!(snapshot.hosts["node"].requested().memory_bytes, 6 * GIB);

    // Positive ack: finalized, snapshot cleared, containers untouched.
    let ack = with_ack(&resized, "102", ConditionStatus::True);
    let done = cache.update_workload(&resized, ack).await.unwrap();
    assert_eq!(action_of(&done), Some("UpdatePodForResizingDone"));
    assert!(done.annotations.get(RESIZE_PREVIOUS_ANNOTATION).is_none());
    assert_eq!(done.containers[0].requests.milli_cpu, Some(4000));
    assert_eq!(done.containers[0].requests.memory_bytes, Some(6 * GIB));
}

#[tokio::test]
async fn test_in_place_resize_rollback() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let request = format!(
        r#"[{{"name":"c1","resources":{{"requests":{{"milli_cpu":4000,"memory_bytes":{mem}}},"limits":{{"milli_cpu":4000,"memory_bytes":{mem}}}}}}}]"#,
        mem = 6 * GIB
    );
    let update = with_resize_request(&pod, "101", "InPlacePreferred", &request);
    let resized = cache.update_workload(&pod, update).await.unwrap();
    assert_eq!(action_of(&resized), Some("UpdatePodForResizing"));

    // Negative ack: containers revert to the snapshot values.
    let ack = with_ack(&resized, "102", ConditionStatus::False);
    let rolled_back = cache.update_workload(&resized, ack).await.unwrap();

    assert_eq!(action_of(&rolled_back), Some("UpdatePodForResizingDone"));
    assert!(rolled_back.annotations.get(RESIZE_PREVIOUS_ANNOTATION).is_none());
    assert_eq!(rolled_back.containers[0].requests.milli_cpu, Some(2000));
    assert_eq!(rolled_back.containers[0].requests.memory_bytes, Some(3 * GIB));
    assert_eq!(rolled_back.containers[0].limits.milli_cpu, Some(2000));
    assert_eq!(rolled_back.containers[0].limits.memory_bytes, Some(3 * GIB));

    // Host aggregates revert with the rollback.
    let snapshot = cache.snapshot().await;
    assert_eq!(snapshot.hosts["node"].requested().milli_cpu, 2000);
    assert_eq!(snapshot.hosts["node"].requested().memory_bytes, 3 * GIB);
}

#[tokio::test]
async fn test_ack_without_condition_leaves_state_pending() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let request = r#"[{"name":"c1","resources":{"requests":{"milli_cpu":3000},"limits":{"milli_cpu":3000}}}]"#;
    let update = with_resize_request(&pod, "101", "InPlacePreferred", request);
    let resized = cache.update_workload(&pod, update).await.unwrap();

    // A later update with no resize condition changes nothing about the
    // pending resize.
    let mut plain = resized.clone();
    plain.version = "102".to_string();
    let after = cache.update_workload(&resized, plain).await.unwrap();

    assert_eq!(action_of(&after), Some("UpdatePodForResizing"));
    assert!(after.annotations.get(RESIZE_PREVIOUS_ANNOTATION).is_some());
    assert_eq!(after.containers[0].requests.milli_cpu, Some(3000));
}

#[tokio::test]
async fn test_ack_with_stale_version_is_ignored() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let request = r#"[{"name":"c1","resources":{"requests":{"milli_cpu":3000},"limits":{"milli_cpu":3000}}}]"#;
    let update = with_resize_request(&pod, "101", "InPlacePreferred", request);
    let resized = cache.update_workload(&pod, update).await.unwrap();

    let mut stale = resized.clone();
    stale.version = "102".to_string();
    stale.conditions = vec![Condition {
        kind: RESIZE_STATUS_CONDITION.to_string(),
        status: ConditionStatus::False,
        message: "some-other-version".to_string(),
    }];
    let after = cache.update_workload(&resized, stale).await.unwrap();

    assert_eq!(action_of(&after), Some("UpdatePodForResizing"));
    assert_eq!(after.containers[0].requests.milli_cpu, Some(3000));
}

#[tokio::test]
async fn test_policy_dispatch_sequence() {
    // Small host so the later requests cannot fit: 1000m CPU, 2000 bytes
    // of memory.
    let cache = PlacementCache::new(CacheConfig::default());
    cache.add_host(host("node", 1000, 2000)).await;
    let pod = resize_pod(vec![container("test", (Some(100), Some(500)), (None, None))]);
    cache.add_workload(pod.clone()).await.unwrap();

    struct Step {
        policy: &'static str,
        request: &'static str,
        expect_action: &'static str,
        expect_cpu: i64,
        expect_mem: i64,
    }
    let steps = [
        Step {
            policy: "InPlacePreferred",
            request: r#"[{"name":"test","resources":{"requests":{"milli_cpu":200}}}]"#,
            expect_action: "UpdatePodForResizing",
            expect_cpu: 200,
            expect_mem: 500,
        },
        Step {
            policy: "InPlacePreferred",
            request: r#"[{"name":"test","resources":{"requests":{"memory_bytes":800}}}]"#,
            expect_action: "UpdatePodForResizing",
            expect_cpu: 200,
            expect_mem: 800,
        },
        Step {
            policy: "InPlacePreferred",
            request: r#"[{"name":"test","resources":{"requests":{"milli_cpu":500,"memory_bytes":1000}}}]"#,
            expect_action: "UpdatePodForResizing",
            expect_cpu: 500,
            expect_mem: 1000,
        },
        Step {
            policy: "InPlaceOnly",
            request: r#"[{"name":"test","resources":{"requests":{"milli_cpu":800,"memory_bytes":3000}}}]"#,
            expect_action: "PodNotResizedDueToPolicy",
            expect_cpu: 500,
            expect_mem: 1000,
        },
        Step {
            policy: "Restart",
            request: r#"[{"name":"test","resources":{"requests":{"memory_bytes":1500}}}]"#,
            expect_action: "DeletePodForResizing",
            expect_cpu: 500,
            expect_mem: 1000,
        },
        Step {
            policy: "InPlacePreferred",
            request: r#"[{"name":"test","resources":{"requests":{"milli_cpu":800,"memory_bytes":3000}}}]"#,
            expect_action: "DeletePodForResizing",
            expect_cpu: 500,
            expect_mem: 1000,
        },
    ];

    let mut current = pod;
    for (i, step) in steps.iter().enumerate() {
        let version = format!("10{i}");
        let update = with_resize_request(&current, &version, step.policy, step.request);
        let result = cache.update_workload(&current, update).await.unwrap();

        assert_eq!(action_of(&result), Some(step.expect_action), "step {i}");
        assert_eq!(
            result.annotations.get(RESIZE_ACTION_VERSION_ANNOTATION),
            Some(&version),
            "step {i}"
        );
        assert_eq!(
            result.containers[0].requests.milli_cpu,
            Some(step.expect_cpu),
            "step {i}"
        );
        assert_eq!(
            result.containers[0].requests.memory_bytes,
            Some(step.expect_mem),
            "step {i}"
        );
        current = result;
    }
}

#[tokio::test]
async fn test_qos_change_refused_in_place() {
    let (cache, pod) = guaranteed_pod_cache().await;

    // Raising only the request above the limit would turn the Guaranteed
    // pod Burstable; in-place is refused even though the host has room.
    let request = r#"[{"name":"c1","resources":{"requests":{"milli_cpu":3000}}}]"#;
    let update = with_resize_request(&pod, "101", "InPlaceOnly", request);
    let result = cache.update_workload(&pod, update).await.unwrap();

    assert_eq!(action_of(&result), Some("PodNotResizedDueToPolicy"));
    assert_eq!(result.containers[0].requests.milli_cpu, Some(2000));

    // The same change under InPlacePreferred falls back to rescheduling.
    let mut retry = result.clone();
    retry.annotations.remove(RESIZE_ACTION_ANNOTATION);
    let update = with_resize_request(&retry, "102", "InPlacePreferred", request);
    let result = cache.update_workload(&result, update).await.unwrap();
    assert_eq!(action_of(&result), Some("DeletePodForResizing"));
}

#[tokio::test]
async fn test_malformed_request_degrades_to_plain_update() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let update = with_resize_request(&pod, "101", "InPlacePreferred", "{not valid json");
    let result = cache.update_workload(&pod, update).await.unwrap();

    // The update itself succeeded; no verdict was published and the
    // containers are untouched.
    assert_eq!(action_of(&result), None);
    assert_eq!(result.containers[0].requests.milli_cpu, Some(2000));
    assert_eq!(cache.get_workload(&pod.id()).await.unwrap().version, "101");
}

#[tokio::test]
async fn test_resize_unknown_policy_defaults_to_preferred() {
    let (cache, pod) = guaranteed_pod_cache().await;

    let request = r#"[{"name":"c1","resources":{"requests":{"milli_cpu":3000},"limits":{"milli_cpu":3000}}}]"#;
    let update = with_resize_request(&pod, "101", "NotAPolicy", request);
    let result = cache.update_workload(&pod, update).await.unwrap();

    assert_eq!(action_of(&result), Some("UpdatePodForResizing"));
    assert_eq!(result.containers[0].requests.milli_cpu, Some(3000));
}
