// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource tree analysis.
//!
//! ```text
//! resource_tree ──► select_nodes ──► fetch_all (parallel, 60 s each)
//!                                         │
//!                                         ▼
//!                  new_generation ◄── successful manifests
//!                        │
//!                        ▼
//!                  pod_metadata ──► ResourceTreeResponse
//! ```

pub mod analyzer;
pub mod hash;
pub mod manifest;
pub mod pods;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::argocd::types::ApplicationCondition;
use crate::argocd::{ApplicationTree, ArgoCdClient, ArgoCdError};

pub use self::analyzer::{FetchResult, FetchedManifest, fetch_all, fetch_manifests, select_nodes};
pub use self::pods::{NewGeneration, PodMetadata, new_generation, pod_metadata};

const SHARED_RESOURCE_WARNING: &str = "SharedResourceWarning";
const UNKNOWN: &str = "Unknown";
const DEGRADED: &str = "Degraded";

/// Analyzed resource tree of one application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTreeResponse {
    #[serde(flatten)]
    pub tree: ApplicationTree,
    pub new_generation_replica_sets: Vec<String>,
    pub new_generation_replica_set: String,
    pub status: String,
    pub pod_metadata: Vec<PodMetadata>,
    pub conditions: Vec<ApplicationCondition>,
}

/// Application health, forced to `Degraded` by any condition other than a
/// shared resource warning.
pub fn application_status(health: &str, conditions: &[ApplicationCondition]) -> String {
    if conditions
        .iter()
        .any(|c| c.condition_type != SHARED_RESOURCE_WARNING)
    {
        return DEGRADED.to_string();
    }
    if health.is_empty() {
        UNKNOWN.to_string()
    } else {
        health.to_string()
    }
}

/// Fetch and analyze the resource tree of `app_name`.
///
/// Only the tree fetch itself can fail. Manifest fetch failures drop the
/// manifest, and an unreadable application reports status `Unknown`.
pub async fn analyze(
    client: Arc<dyn ArgoCdClient>,
    app_name: &str,
) -> Result<ResourceTreeResponse, ArgoCdError> {
    let tree = client.resource_tree(app_name).await?;
    let fetched = fetch_manifests(client.clone(), app_name, &tree).await;
    let generation = new_generation(&fetched);
    let pods = pod_metadata(&tree, &fetched, &generation);

    let (status, conditions) = match client.get(app_name).await {
        Ok(app) => {
            let status = application_status(&app.status.health.status, &app.status.conditions);
            (status, app.status.conditions)
        }
        Err(e) => {
            warn!(application = %app_name, error = %e, "Could not read application status");
            (UNKNOWN.to_string(), Vec::new())
        }
    };

    Ok(ResourceTreeResponse {
        tree,
        new_generation_replica_set: generation.replica_sets.last().cloned().unwrap_or_default(),
        new_generation_replica_sets: generation.replica_sets,
        status,
        pod_metadata: pods,
        conditions,
    })
}
