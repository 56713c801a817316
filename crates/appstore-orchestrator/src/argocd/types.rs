// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ArgoCD wire types, reduced to the fields the orchestrator reads or writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Live view of the objects spawned by an application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationTree {
    /// Every node of the tree
    pub nodes: Vec<ResourceNode>,
}

/// One Kubernetes object in a resource tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceNode {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: String,
    pub parent_refs: Vec<ResourceRef>,
    pub info: Vec<InfoItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networking_info: Option<NetworkingInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Networking details of a node; carries pod labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkingInfo {
    pub labels: BTreeMap<String, String>,
}

/// Reference to a parent object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRef {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// Extra information ArgoCD attaches to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoItem {
    pub name: String,
    pub value: String,
}

/// Health of an application or node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthStatus {
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ResourceNode {
    /// Whether any parent is `kind`/`name`.
    pub fn has_parent(&self, kind: &str, name: &str) -> bool {
        self.parent_refs
            .iter()
            .any(|p| p.kind == kind && p.name == name)
    }

    /// Last parent of kind `kind`.
    pub fn parent_of_kind(&self, kind: &str) -> Option<&ResourceRef> {
        self.parent_refs.iter().rev().find(|p| p.kind == kind)
    }

    /// Networking label `key`, empty when absent.
    pub fn label(&self, key: &str) -> &str {
        self.networking_info
            .as_ref()
            .and_then(|info| info.labels.get(key))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Locator of a single managed resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceQuery {
    /// Application that manages the resource
    pub app_name: String,
    pub resource_name: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub group: String,
}

impl ResourceQuery {
    /// Query for `node` inside application `app_name`.
    pub fn for_node(app_name: &str, node: &ResourceNode) -> Self {
        Self {
            app_name: app_name.to_string(),
            resource_name: node.name.clone(),
            version: node.version.clone(),
            kind: node.kind.clone(),
            namespace: node.namespace.clone(),
            group: node.group.clone(),
        }
    }
}

/// An ArgoCD Application object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Application {
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
    pub destination: ApplicationDestination,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub path: String,
    pub target_revision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelmSource {
    pub value_files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationDestination {
    pub server: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationStatus {
    pub health: HealthStatus,
    pub sync: SyncStatus,
    pub conditions: Vec<ApplicationCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStatus {
    pub status: String,
}

/// Condition reported on an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub message: String,
}

/// Input of application creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTemplate {
    /// `<app>-<env>`
    pub application_name: String,
    /// Namespace ArgoCD keeps its applications in
    pub namespace: String,
    /// Namespace the chart is installed into
    pub target_namespace: String,
    /// Cluster API server URL
    pub target_server: String,
    pub project: String,
    pub values_file: String,
    /// Folder inside the repository
    pub repo_path: String,
    pub repo_url: String,
}

impl AppTemplate {
    /// Application object to create.
    ///
    /// Applications reconcile automatically and prune removed resources.
    pub fn to_application(&self) -> Application {
        Application {
            metadata: ObjectMeta {
                name: self.application_name.clone(),
                namespace: self.namespace.clone(),
                resource_version: String::new(),
            },
            spec: ApplicationSpec {
                source: ApplicationSource {
                    repo_url: self.repo_url.clone(),
                    path: self.repo_path.clone(),
                    target_revision: "HEAD".to_string(),
                    helm: Some(HelmSource {
                        value_files: vec![self.values_file.clone()],
                    }),
                },
                destination: ApplicationDestination {
                    server: self.target_server.clone(),
                    namespace: self.target_namespace.clone(),
                },
                project: self.project.clone(),
                sync_policy: Some(json!({"automated": {"prune": true}})),
            },
            status: ApplicationStatus::default(),
        }
    }
}

/// JSON merge patch that repoints an application at a new chart location.
pub fn source_patch(repo_url: &str, path: &str) -> Value {
    json!({"spec": {"source": {"path": path, "repoURL": repo_url}}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_decodes_with_missing_fields() {
        let tree: ApplicationTree = serde_json::from_value(json!({
            "nodes": [
                {"kind": "Pod", "name": "web-abc-1", "parentRefs": [{"kind": "ReplicaSet", "name": "web-abc"}]},
                {"kind": "Service"}
            ]
        }))
        .unwrap();
        assert_eq!(tree.nodes.len(), 2);
        assert!(tree.nodes[0].has_parent("ReplicaSet", "web-abc"));
        assert_eq!(tree.nodes[1].name, "");
        assert!(tree.nodes[1].health.is_none());
    }

    #[test]
    fn test_template_renders_application() {
        let app = AppTemplate {
            application_name: "nginx-ingress-prod".to_string(),
            namespace: "devtroncd".to_string(),
            target_namespace: "default".to_string(),
            target_server: "https://kubernetes.default.svc".to_string(),
            project: "default".to_string(),
            values_file: "values.yaml".to_string(),
            repo_path: "nginx-ingress-prod".to_string(),
            repo_url: "https://git.example.com/nginx-ingress.git".to_string(),
        }
        .to_application();

        let value = serde_json::to_value(&app).unwrap();
        assert_eq!(value["metadata"]["name"], "nginx-ingress-prod");
        assert_eq!(value["spec"]["source"]["repoURL"], "https://git.example.com/nginx-ingress.git");
        assert_eq!(value["spec"]["source"]["helm"]["valueFiles"][0], "values.yaml");
        assert_eq!(value["spec"]["destination"]["namespace"], "default");
        assert_eq!(value["spec"]["syncPolicy"]["automated"]["prune"], true);
    }

    #[test]
    fn test_source_patch_shape() {
        assert_eq!(
            source_patch("https://b.example.com/x.git", "x-prod"),
            json!({"spec": {"source": {"path": "x-prod", "repoURL": "https://b.example.com/x.git"}}})
        );
    }
}
