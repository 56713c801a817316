// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single install scenarios: happy path, leg failures and resumption.

mod common;

use appstore_core::{DeploymentStatus, ReferenceValueKind, Repository, Transaction};
use appstore_orchestrator::Error;
use appstore_orchestrator::argocd::MockOp;
use appstore_orchestrator::chart::{REQUIREMENTS_YAML_FILE, VALUES_YAML_FILE};
use appstore_orchestrator::git::MockGitClient;
use common::*;

#[tokio::test]
async fn test_install_deploys_through_every_leg() {
    let ctx = TestContext::new();

    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    assert_eq!(installed.status, Some(DeploymentStatus::DeploySuccess));
    assert_eq!(installed.acd_app_name, "ingress-prod");
    assert_eq!(installed.environment_name, "prod");
    assert_eq!(installed.app_store_name, CHART_NAME);
    assert_eq!(ctx.status_of(installed.installed_app_id).await, DeploymentStatus::DeploySuccess);
    assert_eq!(
        ctx.history_of(installed.id).await,
        vec![
            DeploymentStatus::DeployInit,
            DeploymentStatus::GitSuccess,
            DeploymentStatus::AcdSuccess,
            DeploymentStatus::DeploySuccess,
        ]
    );

    // Proxy chart, then requirements, then values, all in the app folder.
    assert_eq!(
        ctx.git.charts().await,
        vec![(CHART_NAME.to_string(), "ingress-prod".to_string())]
    );
    let files: Vec<_> = ctx
        .git
        .commits()
        .await
        .into_iter()
        .map(|c| (c.file_name, c.chart_location, c.message))
        .collect();
    assert_eq!(
        files,
        vec![
            (
                REQUIREMENTS_YAML_FILE.to_string(),
                "ingress-prod".to_string(),
                "release-42-env-7".to_string()
            ),
            (
                VALUES_YAML_FILE.to_string(),
                "ingress-prod".to_string(),
                "release-42-env-7".to_string()
            ),
        ]
    );
    let requirements = &ctx.git.commits_of(REQUIREMENTS_YAML_FILE).await[0].content;
    assert!(requirements.contains("4.0.1"));
    assert!(requirements.contains(CHART_REPO_URL));
    let values = &ctx.git.commits_of(VALUES_YAML_FILE).await[0].content;
    assert!(values.contains("replicaCount: 2"));

    let app = ctx.argocd.application("ingress-prod").await.unwrap();
    assert_eq!(app.spec.source.repo_url, "https://git.example.com/charts/nginx-ingress.git");
    assert_eq!(app.spec.source.path, "ingress-prod");
    assert_eq!(app.spec.destination.namespace, "prod");
    assert_eq!(
        ctx.argocd.repositories().await,
        vec!["https://git.example.com/charts/nginx-ingress.git".to_string()]
    );
    assert_eq!(ctx.argocd.calls_of("sync").await.len(), 1);
}

#[tokio::test]
async fn test_blank_values_fall_back_to_chart_defaults() {
    let ctx = TestContext::new();
    let mut request = ctx.install_request("ingress");
    request.values_override_yaml = String::new();
    request.reference_value_kind = ReferenceValueKind::Default;
    request.reference_value_id = 0;

    let installed = ctx.service.install_app(request).await.unwrap();

    assert_eq!(installed.values_override_yaml, DEFAULT_VALUES);
    let values = &ctx.git.commits_of(VALUES_YAML_FILE).await[0].content;
    assert!(values.contains("replicaCount: 1"));
}

#[tokio::test]
async fn test_template_values_are_resolved() {
    let ctx = TestContext::new();
    let template_id = ctx.repo.add_values_template("controller:\n  replicaCount: 5\n");
    let mut request = ctx.install_request("ingress");
    request.values_override_yaml = String::new();
    request.reference_value_kind = ReferenceValueKind::Template;
    request.reference_value_id = template_id;

    let installed = ctx.service.install_app(request).await.unwrap();

    assert!(installed.values_override_yaml.contains("replicaCount: 5"));
}

#[tokio::test]
async fn test_git_failure_is_recorded_and_resumable() {
    let git = MockGitClient::new();
    git.fail_on_file(VALUES_YAML_FILE, 1).await;
    let ctx = TestContext::with_git(git);

    let err = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Git(_)));

    let version = ctx
        .repo
        .get_all_installed_apps(&[ENV_ID])
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(ctx.status_of(version.installed_app_id).await, DeploymentStatus::GitError);
    assert!(ctx.argocd.calls_of("create").await.is_empty());

    let resumed = ctx
        .service
        .perform_deploy_stage(version.installed_app_version_id, USER_ID)
        .await
        .unwrap();

    assert_eq!(resumed.status, Some(DeploymentStatus::DeploySuccess));
    assert_eq!(
        ctx.history_of(version.installed_app_version_id).await,
        vec![
            DeploymentStatus::DeployInit,
            DeploymentStatus::GitError,
            DeploymentStatus::GitSuccess,
            DeploymentStatus::AcdSuccess,
            DeploymentStatus::DeploySuccess,
        ]
    );
    assert_eq!(ctx.git.commits_of(VALUES_YAML_FILE).await.len(), 1);
    assert!(ctx.argocd.application("ingress-prod").await.is_some());
}

#[tokio::test]
async fn test_acd_failure_resumes_without_recommitting() {
    let ctx = TestContext::new();
    ctx.argocd.fail(MockOp::Create, 1).await;

    let err = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ArgoCd(_)));

    let row = ctx.repo.get_all_installed_apps(&[]).await.unwrap().pop().unwrap();
    assert_eq!(ctx.status_of(row.installed_app_id).await, DeploymentStatus::AcdError);
    let commits_before = ctx.git.commits().await.len();

    ctx.service
        .perform_deploy_stage(row.installed_app_version_id, USER_ID)
        .await
        .unwrap();

    assert_eq!(ctx.status_of(row.installed_app_id).await, DeploymentStatus::DeploySuccess);
    assert_eq!(ctx.git.commits().await.len(), commits_before);
    assert_eq!(ctx.git.charts().await.len(), 1);
    assert_eq!(ctx.argocd.calls_of("create").await.len(), 2);
}

#[tokio::test]
async fn test_acd_resume_uses_workspace_scoped_repository() {
    let ctx = TestContext::new();
    ctx.repo.set_gitops_config("BITBUCKET_CLOUD", "team-ws");
    ctx.argocd.fail(MockOp::Create, 1).await;

    ctx.service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap_err();
    let row = ctx.repo.get_all_installed_apps(&[]).await.unwrap().pop().unwrap();
    assert_eq!(ctx.status_of(row.installed_app_id).await, DeploymentStatus::AcdError);

    ctx.service
        .perform_deploy_stage(row.installed_app_version_id, USER_ID)
        .await
        .unwrap();

    let committed_to = "https://git.example.com/charts/team-ws/nginx-ingress.git".to_string();
    let app = ctx.argocd.application("ingress-prod").await.unwrap();
    assert_eq!(app.spec.source.repo_url, committed_to);
    assert_eq!(ctx.argocd.repositories().await, vec![committed_to]);
}

#[tokio::test]
async fn test_existing_application_counts_as_created() {
    let ctx = TestContext::new();
    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    // Pretend the last attempt crashed after ArgoCD accepted the application.
    ctx.repo
        .force_status(installed.installed_app_id, DeploymentStatus::GitSuccess);
    ctx.service
        .perform_deploy_stage(installed.id, USER_ID)
        .await
        .unwrap();

    assert_eq!(ctx.status_of(installed.installed_app_id).await, DeploymentStatus::DeploySuccess);
}

#[tokio::test]
async fn test_deployed_version_is_not_redeployed() {
    let ctx = TestContext::new();
    let installed = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();
    let commits = ctx.git.commits().await.len();
    let calls = ctx.argocd.calls().await.len();

    let again = ctx
        .service
        .perform_deploy_stage(installed.id, USER_ID)
        .await
        .unwrap();

    assert_eq!(again.status, Some(DeploymentStatus::DeploySuccess));
    assert_eq!(ctx.git.commits().await.len(), commits);
    assert_eq!(ctx.argocd.calls().await.len(), calls);
    assert_eq!(ctx.history_of(installed.id).await.len(), 4);
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let ctx = TestContext::new();
    ctx.service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap();

    let err = ctx
        .service
        .install_app(ctx.install_request("ingress"))
        .await
        .unwrap_err();

    assert!(matches!(&err, Error::AppAlreadyExists(name) if name == "ingress"));
    let api = err.to_api_error();
    assert_eq!(api.http_status, 409);
    assert_eq!(api.user_message, "app already exists with name ingress");
    assert_eq!(ctx.repo.installed_app_count(), 1);
}

#[tokio::test]
async fn test_concurrent_same_name_keeps_oldest_app() {
    let ctx = TestContext::new();
    let mut tx = ctx.repo.begin().await.unwrap();

    let mut first = ctx.install_request("ingress");
    ctx.service.deploy_db(&mut *tx, &mut first).await.unwrap();

    // The pool-level name check cannot see the uncommitted first row.
    let mut second = ctx.install_request("ingress");
    let err = ctx.service.deploy_db(&mut *tx, &mut second).await.unwrap_err();
    assert!(matches!(&err, Error::AppAlreadyExists(name) if name == "ingress"));

    let active = tx.find_active_apps_by_name("ingress").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first.app_id);

    tx.commit().await.unwrap();
    assert_eq!(ctx.repo.installed_app_count(), 1);
    assert_eq!(
        ctx.repo.find_active_app_by_name("ingress").await.unwrap().map(|a| a.id),
        Some(first.app_id)
    );
}

#[tokio::test]
async fn test_invalid_requests_touch_nothing() {
    let ctx = TestContext::new();

    let mut missing_env = ctx.install_request("ingress");
    missing_env.environment_id = 0;
    let err = ctx.service.install_app(missing_env).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let mut unknown_version = ctx.install_request("ingress");
    unknown_version.app_store_version = 999;
    let err = ctx.service.install_app(unknown_version).await.unwrap_err();
    assert_eq!(err.to_api_error().http_status, 404);

    assert_eq!(ctx.repo.installed_app_count(), 0);
    assert!(ctx.git.commits().await.is_empty());
    assert!(ctx.argocd.calls().await.is_empty());
}
