// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node selection and parallel manifest fetch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::argocd::{
    ApplicationTree, ArgoCdClient, ArgoCdError, RESOURCE_FETCH_TIMEOUT, ResourceNode,
    ResourceQuery,
};

/// Outcome of one `get_resource` call.
#[derive(Debug)]
pub struct FetchResult {
    pub request: ResourceQuery,
    pub response: Result<Value, ArgoCdError>,
}

/// A successfully fetched manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedManifest {
    pub request: ResourceQuery,
    pub manifest: Value,
}

/// Nodes whose manifests are needed to tell new pods from old ones.
///
/// Workload controllers are always selected. ReplicaSets are selected when
/// they own a pod. Pods are selected when a StatefulSet, DaemonSet, Workflow,
/// Job or CronJob is present. ControllerRevisions are selected when a
/// DaemonSet pod references them.
pub fn select_nodes(tree: &ApplicationTree) -> Vec<&ResourceNode> {
    let pod_parents: HashSet<&str> = tree
        .nodes
        .iter()
        .filter(|n| n.kind == "Pod")
        .flat_map(|n| n.parent_refs.iter().map(|p| p.name.as_str()))
        .collect();

    let mut selected = Vec::new();
    let mut need_pods = false;
    for node in &tree.nodes {
        match node.kind.as_str() {
            "Rollout" | "Deployment" => selected.push(node),
            "StatefulSet" | "DaemonSet" => {
                selected.push(node);
                need_pods = true;
            }
            "ReplicaSet" if pod_parents.contains(node.name.as_str()) => selected.push(node),
            "Workflow" => need_pods = true,
            "CronJob" | "Job" => {
                selected.push(node);
                need_pods = true;
            }
            _ => {}
        }
    }

    if need_pods {
        selected.extend(tree.nodes.iter().filter(|n| n.kind == "Pod"));
    }

    let relevant_revisions: HashSet<String> = tree
        .nodes
        .iter()
        .filter(|n| n.kind == "Pod")
        .map(|pod| {
            let daemon_set = pod
                .parent_of_kind("DaemonSet")
                .map(|p| p.name.as_str())
                .unwrap_or("");
            format!("{daemon_set}-{}", pod.label("controller-revision-hash"))
        })
        .collect();
    selected.extend(
        tree.nodes
            .iter()
            .filter(|n| n.kind == "ControllerRevision" && relevant_revisions.contains(&n.name)),
    );

    selected
}

/// Fetch every node concurrently, each call bounded by the resource timeout.
///
/// All fetches are awaited; failures are logged and reported in the result.
pub async fn fetch_all(
    client: Arc<dyn ArgoCdClient>,
    app_name: &str,
    nodes: &[&ResourceNode],
) -> Vec<FetchResult> {
    let mut tasks = JoinSet::new();
    for node in nodes {
        let client = client.clone();
        let request = ResourceQuery::for_node(app_name, node);
        tasks.spawn(async move {
            let started = Instant::now();
            let response =
                match tokio::time::timeout(RESOURCE_FETCH_TIMEOUT, client.get_resource(&request))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => Err(ArgoCdError::Timeout("get_resource")),
                };
            match &response {
                Ok(_) => debug!(
                    kind = %request.kind,
                    name = %request.resource_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fetched resource"
                ),
                Err(e) => error!(
                    kind = %request.kind,
                    name = %request.resource_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Failed to fetch resource"
                ),
            }
            FetchResult { request, response }
        });
    }

    let mut results = Vec::with_capacity(nodes.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => error!(error = %e, "Resource fetch task failed"),
        }
    }
    results
}

/// Select, fetch and keep the successful manifests.
pub async fn fetch_manifests(
    client: Arc<dyn ArgoCdClient>,
    app_name: &str,
    tree: &ApplicationTree,
) -> Vec<FetchedManifest> {
    let nodes = select_nodes(tree);
    if nodes.is_empty() {
        return Vec::new();
    }
    fetch_all(client, app_name, &nodes)
        .await
        .into_iter()
        .filter_map(|r| {
            r.response.ok().map(|manifest| FetchedManifest {
                request: r.request,
                manifest,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::MockArgoCdClient;
    use crate::argocd::types::{NetworkingInfo, ResourceRef};
    use serde_json::json;
    use std::time::Duration;

    fn node(kind: &str, name: &str) -> ResourceNode {
        ResourceNode {
            kind: kind.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn child(kind: &str, name: &str, parent_kind: &str, parent: &str) -> ResourceNode {
        ResourceNode {
            parent_refs: vec![ResourceRef {
                kind: parent_kind.to_string(),
                name: parent.to_string(),
                ..Default::default()
            }],
            ..node(kind, name)
        }
    }

    fn names(nodes: &[&ResourceNode]) -> Vec<String> {
        nodes.iter().map(|n| format!("{}/{}", n.kind, n.name)).collect()
    }

    #[test]
    fn test_deployment_selects_owning_replica_sets_only() {
        let tree = ApplicationTree {
            nodes: vec![
                node("Deployment", "web"),
                child("ReplicaSet", "web-new", "Deployment", "web"),
                child("ReplicaSet", "web-idle", "Deployment", "web"),
                child("Pod", "web-new-1", "ReplicaSet", "web-new"),
                node("Service", "web"),
            ],
        };
        assert_eq!(
            names(&select_nodes(&tree)),
            vec!["Deployment/web", "ReplicaSet/web-new"]
        );
    }

    #[test]
    fn test_daemon_set_pulls_pods_and_revisions() {
        let mut pod = child("Pod", "agent-x", "DaemonSet", "agent");
        pod.networking_info = Some(NetworkingInfo {
            labels: [("controller-revision-hash".to_string(), "7f9".to_string())].into(),
        });
        let tree = ApplicationTree {
            nodes: vec![
                node("DaemonSet", "agent"),
                pod,
                node("ControllerRevision", "agent-7f9"),
                node("ControllerRevision", "agent-old"),
            ],
        };
        assert_eq!(
            names(&select_nodes(&tree)),
            vec!["DaemonSet/agent", "Pod/agent-x", "ControllerRevision/agent-7f9"]
        );
    }

    #[test]
    fn test_job_and_workflow_need_pods() {
        let tree = ApplicationTree {
            nodes: vec![
                node("Workflow", "wf"),
                child("Pod", "wf-1", "Workflow", "wf"),
            ],
        };
        assert_eq!(names(&select_nodes(&tree)), vec!["Pod/wf-1"]);

        let tree = ApplicationTree {
            nodes: vec![node("CronJob", "nightly"), child("Pod", "nightly-1", "Job", "nightly-123")],
        };
        assert_eq!(
            names(&select_nodes(&tree)),
            vec!["CronJob/nightly", "Pod/nightly-1"]
        );
    }

    #[test]
    fn test_empty_tree_selects_nothing() {
        assert!(select_nodes(&ApplicationTree::default()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_keeps_successes_and_times_out_stalled_calls() {
        let acd = MockArgoCdClient::new();
        acd.set_resource("StatefulSet", "db", json!({"kind": "StatefulSet"}))
            .await;
        acd.set_resource("Pod", "db-0", json!({"kind": "Pod"})).await;
        acd.set_resource("Pod", "db-1", json!({"kind": "Pod"})).await;
        acd.stall_resource("db-1").await;

        let tree = ApplicationTree {
            nodes: vec![
                node("StatefulSet", "db"),
                child("Pod", "db-0", "StatefulSet", "db"),
                child("Pod", "db-1", "StatefulSet", "db"),
                child("Pod", "db-2", "StatefulSet", "db"),
            ],
        };
        let client: Arc<dyn ArgoCdClient> = Arc::new(acd.clone());

        let nodes = select_nodes(&tree);
        let started = tokio::time::Instant::now();
        let results = fetch_all(client.clone(), "db-prod", &nodes).await;
        assert_eq!(results.len(), 4);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(results.iter().any(|r| matches!(
            (&r.request.resource_name[..], &r.response),
            ("db-1", Err(ArgoCdError::Timeout(_)))
        )));

        let mut fetched: Vec<String> = fetch_manifests(client, "db-prod", &tree)
            .await
            .into_iter()
            .map(|m| m.request.resource_name)
            .collect();
        fetched.sort();
        assert_eq!(fetched, vec!["db", "db-0"]);
    }
}
