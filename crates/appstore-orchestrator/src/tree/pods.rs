// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! "Is this pod part of the current revision?" per workload kind.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::analyzer::FetchedManifest;
use super::hash::pod_template_hash;
use super::manifest::{Node, label, names, resource_name};
use crate::argocd::ApplicationTree;

const POD_TEMPLATE_HASH: &str = "pod-template-hash";
const ROLLOUT_POD_TEMPLATE_HASH: &str = "rollouts-pod-template-hash";
const CONTROLLER_REVISION_HASH: &str = "controller-revision-hash";

/// Containers and revision membership of one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetadata {
    pub name: String,
    pub uid: String,
    pub containers: Vec<String>,
    pub init_containers: Vec<String>,
    pub is_new: bool,
}

/// Fetched manifests grouped by kind.
#[derive(Debug, Default)]
struct Manifests<'a> {
    rollouts: Vec<&'a Value>,
    deployments: Vec<&'a Value>,
    stateful_sets: Vec<&'a Value>,
    daemon_sets: Vec<&'a Value>,
    jobs: Vec<&'a Value>,
    replica_sets: Vec<&'a Value>,
    pods: Vec<&'a Value>,
    controller_revisions: Vec<&'a Value>,
}

impl<'a> Manifests<'a> {
    fn group(fetched: &'a [FetchedManifest]) -> Self {
        let mut manifests = Manifests::default();
        for item in fetched {
            let bucket = match item.request.kind.as_str() {
                "Rollout" => &mut manifests.rollouts,
                "Deployment" => &mut manifests.deployments,
                "StatefulSet" => &mut manifests.stateful_sets,
                "DaemonSet" => &mut manifests.daemon_sets,
                "Job" | "CronJob" => &mut manifests.jobs,
                "ReplicaSet" => &mut manifests.replica_sets,
                "Pod" => &mut manifests.pods,
                "ControllerRevision" => &mut manifests.controller_revisions,
                _ => continue,
            };
            bucket.push(&item.manifest);
        }
        manifests
    }
}

/// ReplicaSet whose template matches the Deployment's current template.
///
/// The ReplicaSet's own `pod-template-hash` label is removed before hashing,
/// and both sides use the Deployment's collision count.
pub fn deployment_new_replica_set(deployment: &Value, replica_sets: &[&Value]) -> Option<String> {
    let root = Node::of(deployment);
    let collision_count = root.path(&["status", "collisionCount"]).i64();
    let template = root
        .path(&["spec", "template"])
        .object()
        .map(|m| Value::Object(m.clone()))
        .unwrap_or(Value::Object(Default::default()));
    let wanted = pod_template_hash(&template, collision_count);

    let mut found = None;
    for rs in replica_sets {
        let Some(rs_template) = Node::of(rs).path(&["spec", "template"]).object() else {
            continue;
        };
        let mut rs_template = rs_template.clone();
        if let Some(Value::Object(metadata)) = rs_template.get_mut("metadata") {
            if let Some(Value::Object(labels)) = metadata.get_mut("labels") {
                labels.remove(POD_TEMPLATE_HASH);
            }
        }
        if pod_template_hash(&Value::Object(rs_template), collision_count) == wanted {
            found = Some(resource_name(rs).to_string());
        }
    }
    found.filter(|name| !name.is_empty())
}

/// ReplicaSet labelled with the Rollout's `status.currentPodHash`.
pub fn rollout_new_replica_set(rollout: &Value, replica_sets: &[&Value]) -> Option<String> {
    let current = Node::of(rollout).path(&["status", "currentPodHash"]).str();
    let mut found = None;
    for rs in replica_sets {
        if label(rs, ROLLOUT_POD_TEMPLATE_HASH) == current {
            found = Some(resource_name(rs).to_string());
        }
    }
    found.filter(|name| !name.is_empty())
}

/// Pods labelled with the StatefulSet's `status.updateRevision`.
pub fn stateful_set_new_pods(stateful_set: &Value, pods: &[&Value]) -> HashSet<String> {
    let update_revision = Node::of(stateful_set)
        .path(&["status", "updateRevision"])
        .str();
    pods.iter()
        .filter(|pod| label(pod, CONTROLLER_REVISION_HASH) == update_revision)
        .map(|pod| resource_name(pod).to_string())
        .collect()
}

/// Pods on the hash of the DaemonSet's highest ControllerRevision.
pub fn daemon_set_new_pods(pods: &[&Value], controller_revisions: &[&Value]) -> HashSet<String> {
    let mut latest_generation = 0;
    let mut latest_hash = "";
    for revision in controller_revisions {
        let generation = Node::of(revision).get("revision").i64().unwrap_or(0);
        if latest_generation < generation {
            latest_generation = generation;
            latest_hash = label(revision, CONTROLLER_REVISION_HASH);
        }
    }
    pods.iter()
        .filter(|pod| label(pod, CONTROLLER_REVISION_HASH) == latest_hash)
        .map(|pod| resource_name(pod).to_string())
        .collect()
}

/// Jobs have no revisions; every pod is new.
pub fn job_new_pods(pods: &[&Value]) -> HashSet<String> {
    pods.iter()
        .map(|pod| resource_name(pod).to_string())
        .collect()
}

/// Result of the per-kind predicates.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NewGeneration {
    /// Current ReplicaSets of Deployments and Rollouts
    pub replica_sets: Vec<String>,
    /// Current pods of StatefulSets, DaemonSets and Jobs
    pub pods: HashSet<String>,
}

/// Run every predicate over the fetched manifests.
pub fn new_generation(fetched: &[FetchedManifest]) -> NewGeneration {
    let manifests = Manifests::group(fetched);
    let mut generation = NewGeneration::default();

    for rollout in &manifests.rollouts {
        generation
            .replica_sets
            .extend(rollout_new_replica_set(rollout, &manifests.replica_sets));
    }
    for deployment in &manifests.deployments {
        generation
            .replica_sets
            .extend(deployment_new_replica_set(deployment, &manifests.replica_sets));
    }
    for stateful_set in &manifests.stateful_sets {
        generation
            .pods
            .extend(stateful_set_new_pods(stateful_set, &manifests.pods));
    }
    if !manifests.daemon_sets.is_empty() {
        generation.pods.extend(daemon_set_new_pods(
            &manifests.pods,
            &manifests.controller_revisions,
        ));
    }
    if !manifests.jobs.is_empty() {
        generation.pods.extend(job_new_pods(&manifests.pods));
    }
    generation
}

/// One entry per Pod node of the tree.
///
/// Containers come from the parent ReplicaSet's template when it was fetched,
/// otherwise from the pod manifest.
pub fn pod_metadata(
    tree: &ApplicationTree,
    fetched: &[FetchedManifest],
    generation: &NewGeneration,
) -> Vec<PodMetadata> {
    let manifests = Manifests::group(fetched);
    let replica_sets: HashMap<&str, &Value> = manifests
        .replica_sets
        .iter()
        .map(|rs| (resource_name(rs), *rs))
        .collect();
    let pods: HashMap<&str, &Value> = manifests
        .pods
        .iter()
        .map(|pod| (resource_name(pod), *pod))
        .collect();

    tree.nodes
        .iter()
        .filter(|node| node.kind == "Pod")
        .map(|node| {
            let parent_rs = node.parent_of_kind("ReplicaSet").map(|p| p.name.as_str());
            let spec = match parent_rs.and_then(|name| replica_sets.get(name)) {
                Some(rs) => Node::of(rs).path(&["spec", "template", "spec"]),
                None => pods
                    .get(node.name.as_str())
                    .map(|pod| Node::of(pod).get("spec"))
                    .unwrap_or(Node::Missing),
            };
            let is_new = parent_rs
                .map(|rs| generation.replica_sets.iter().any(|n| n == rs))
                .unwrap_or(false)
                || generation.pods.contains(&node.name);
            PodMetadata {
                name: node.name.clone(),
                uid: node.uid.clone(),
                containers: names(spec.get("containers")),
                init_containers: names(spec.get("initContainers")),
                is_new,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::ResourceQuery;
    use serde_json::json;

    fn fetched(kind: &str, manifest: Value) -> FetchedManifest {
        FetchedManifest {
            request: ResourceQuery {
                kind: kind.to_string(),
                resource_name: resource_name(&manifest).to_string(),
                ..Default::default()
            },
            manifest,
        }
    }

    fn pod(name: &str, labels: Value) -> Value {
        json!({
            "kind": "Pod",
            "metadata": {"name": name, "labels": labels},
            "spec": {"containers": [{"name": "main"}]}
        })
    }

    #[test]
    fn test_deployment_matches_replica_set_by_template_not_label() {
        let template = |image: &str, hash: &str| {
            json!({
                "metadata": {"labels": {"app": "web", "pod-template-hash": hash}},
                "spec": {"containers": [{"name": "main", "image": image}]}
            })
        };
        let deployment = json!({
            "metadata": {"name": "web"},
            "spec": {"template": {
                "metadata": {"labels": {"app": "web"}},
                "spec": {"containers": [{"name": "main", "image": "web:2"}]}
            }},
            "status": {"collisionCount": 1}
        });
        let wanted = pod_template_hash(&deployment["spec"]["template"], Some(1));
        // The stale ReplicaSet carries the fingerprint as its label, the current one does not.
        let old = json!({"metadata": {"name": "web-old"}, "spec": {"template": template("web:1", &wanted)}});
        let new = json!({"metadata": {"name": "web-new"}, "spec": {"template": template("web:2", "abc")}});

        assert_ne!(wanted, "abc");
        assert_eq!(
            deployment_new_replica_set(&deployment, &[&old, &new]).as_deref(),
            Some("web-new")
        );
        assert_eq!(deployment_new_replica_set(&deployment, &[&old]), None);
    }

    #[test]
    fn test_stateful_set_update_revision() {
        let sts = json!({"status": {"updateRevision": "db-2"}});
        let p0 = pod("db-0", json!({"controller-revision-hash": "db-2"}));
        let p1 = pod("db-1", json!({"controller-revision-hash": "db-1"}));
        let new = stateful_set_new_pods(&sts, &[&p0, &p1]);
        assert_eq!(new, HashSet::from(["db-0".to_string()]));
    }

    #[test]
    fn test_daemon_set_uses_highest_revision() {
        let old = json!({"revision": 1, "metadata": {"name": "agent-aaa", "labels": {"controller-revision-hash": "aaa"}}});
        let new = json!({"revision": 4, "metadata": {"name": "agent-bbb", "labels": {"controller-revision-hash": "bbb"}}});
        let p0 = pod("agent-x", json!({"controller-revision-hash": "bbb"}));
        let p1 = pod("agent-y", json!({"controller-revision-hash": "aaa"}));
        let result = daemon_set_new_pods(&[&p0, &p1], &[&new, &old]);
        assert_eq!(result, HashSet::from(["agent-x".to_string()]));
    }

    #[test]
    fn test_rollout_current_pod_hash() {
        let rollout = json!({"status": {"currentPodHash": "5d7"}});
        let rs_old = json!({"metadata": {"name": "web-4c2", "labels": {"rollouts-pod-template-hash": "4c2"}}});
        let rs_new = json!({"metadata": {"name": "web-5d7", "labels": {"rollouts-pod-template-hash": "5d7"}}});
        assert_eq!(
            rollout_new_replica_set(&rollout, &[&rs_old, &rs_new]).as_deref(),
            Some("web-5d7")
        );
    }

    #[test]
    fn test_job_pods_are_all_new() {
        let p0 = pod("job-a", json!({}));
        let p1 = pod("job-b", json!({}));
        assert_eq!(job_new_pods(&[&p0, &p1]).len(), 2);
    }

    #[test]
    fn test_malformed_manifests_do_not_match() {
        let broken = json!({"status": "oops", "spec": ["not", "a", "map"]});
        let rs = json!({"metadata": "nope", "spec": {"template": 7}});
        assert_eq!(deployment_new_replica_set(&broken, &[&rs]), None);
        assert_eq!(rollout_new_replica_set(&broken, &[&rs]), None);
        assert!(stateful_set_new_pods(&broken, &[&rs]).iter().all(|n| n.is_empty()));
        let revision = json!({"revision": "three"});
        assert!(daemon_set_new_pods(&[], &[&revision]).is_empty());
    }

    #[test]
    fn test_pod_metadata_falls_back_to_pod_manifest() {
        let tree: ApplicationTree = serde_json::from_value(json!({
            "nodes": [
                {"kind": "StatefulSet", "name": "db"},
                {"kind": "Pod", "name": "db-0", "uid": "u0", "parentRefs": [{"kind": "StatefulSet", "name": "db"}]},
                {"kind": "Pod", "name": "db-1", "uid": "u1", "parentRefs": [{"kind": "StatefulSet", "name": "db"}]}
            ]
        }))
        .unwrap();
        let fetched = vec![
            fetched("StatefulSet", json!({"metadata": {"name": "db"}, "status": {"updateRevision": "r2"}})),
            fetched("Pod", json!({
                "metadata": {"name": "db-0", "labels": {"controller-revision-hash": "r2"}},
                "spec": {"containers": [{"name": "postgres"}], "initContainers": [{"name": "init-perms"}]}
            })),
        ];

        let generation = new_generation(&fetched);
        let metadata = pod_metadata(&tree, &fetched, &generation);
        assert_eq!(
            metadata,
            vec![
                PodMetadata {
                    name: "db-0".to_string(),
                    uid: "u0".to_string(),
                    containers: vec!["postgres".to_string()],
                    init_containers: vec!["init-perms".to_string()],
                    is_new: true,
                },
                PodMetadata {
                    name: "db-1".to_string(),
                    uid: "u1".to_string(),
                    containers: vec![],
                    init_containers: vec![],
                    is_new: false,
                },
            ]
        );
    }
}
