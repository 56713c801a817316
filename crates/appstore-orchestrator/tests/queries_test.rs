// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read paths: name checks, listings and app details.

mod common;

use appstore_core::models::AppStoreFilter;
use appstore_orchestrator::Error;
use appstore_orchestrator::api::codes;
use appstore_orchestrator::argocd::{ApplicationTree, ResourceNode};
use common::*;

#[tokio::test]
async fn test_check_app_exists_suggests_free_names() {
    let ctx = TestContext::new();
    ctx.service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    let checks = ctx
        .service
        .check_app_exists(&["ingress".to_string(), "fresh".to_string()])
        .await
        .unwrap();

    assert!(checks[0].exists);
    assert!(checks[0].suggested_name.starts_with("ingress-"));
    assert_eq!(checks[0].suggested_name.len(), "ingress-".len() + 5);
    assert!(!checks[1].exists);
    assert!(checks[1].suggested_name.is_empty());
}

#[tokio::test]
async fn test_get_installed_app_and_version() {
    let ctx = TestContext::new();
    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    let info = ctx
        .service
        .get_installed_app(installed.installed_app_id)
        .await
        .unwrap();
    assert_eq!(info.environment_id, ENV_ID);
    assert_eq!(info.app_id, installed.app_id);

    let version = ctx.service.get_installed_app_version(installed.id).await.unwrap();
    assert_eq!(version.app_store_version, APP_STORE_VERSION_ID);
    assert_eq!(version.acd_app_name, "ingress-prod");
    assert_eq!(version.values_override_yaml, "controller:\n  replicaCount: 2\n");

    let err = ctx.service.get_installed_app(9999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_get_all_filters_by_name_and_environment() {
    let ctx = TestContext::new();
    for name in ["ingress", "edge"] {
        ctx.service
            .install_app(ctx.install_request(name))
            .await
            .unwrap();
    }

    let all = ctx.service.get_all(&AppStoreFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|a| a.cluster_name == "default_cluster"));
    assert!(all.iter().all(|a| a.chart_version == "4.0.1"));

    let filtered = ctx
        .service
        .get_all(&AppStoreFilter {
            app_name: Some("edg".to_string()),
            environment_ids: vec![ENV_ID],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].app_name, "edge");

    let other_env = ctx
        .service
        .get_all(&AppStoreFilter {
            environment_ids: vec![ENV_ID + 1],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(other_env.is_empty());
}

#[tokio::test]
async fn test_app_details_carry_resource_tree() {
    let ctx = TestContext::new();
    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();
    ctx.argocd
        .set_tree(
            "ingress-prod",
            ApplicationTree {
                nodes: vec![ResourceNode {
                    version: "v1".to_string(),
                    kind: "Service".to_string(),
                    namespace: "prod".to_string(),
                    name: "ingress-controller".to_string(),
                    ..Default::default()
                }],
            },
        )
        .await;

    let details = ctx
        .service
        .find_app_details(installed.installed_app_id, ENV_ID)
        .await
        .unwrap();

    assert!(details.tree_error.is_none());
    assert_eq!(details.container.deployment_detail.app_name, "ingress");
    assert_eq!(details.container.resource_tree.tree.nodes.len(), 1);

    let response = details.into_response();
    assert_eq!(response.code, 200);
    assert!(response.errors.is_none());
}

#[tokio::test]
async fn test_missing_tree_returns_detail_with_error() {
    let ctx = TestContext::new();
    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    let details = ctx
        .service
        .find_app_details(installed.installed_app_id, ENV_ID)
        .await
        .unwrap();

    assert!(matches!(details.tree_error, Some(Error::ResourceTreeNotFound { .. })));
    assert!(details.container.resource_tree.tree.nodes.is_empty());

    let response = details.into_response();
    assert_eq!(response.code, 404);
    let result = response.result.unwrap();
    assert_eq!(result.deployment_detail.environment_name, "prod");
    let errors = response.errors.unwrap();
    assert_eq!(errors[0].code, codes::APP_DETAIL_RESOURCE_TREE_NOT_FOUND);
}

#[tokio::test]
async fn test_app_details_of_unknown_app_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx.service.find_app_details(1, ENV_ID).await.unwrap_err();
    assert_eq!(err.to_api_error().http_status, 404);
}
