// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ArgoCD client over the REST gateway.
//!
//! The HTTP client and the session token live in a slot that is filled on
//! first use and emptied by [`ArgoCdClient::teardown`] or by a 401 response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use super::types::{AppTemplate, Application, ApplicationTree, ResourceQuery};
use super::{ArgoCdClient, ArgoCdError, RESOURCE_FETCH_TIMEOUT, Result};
use crate::config::ArgoCdSettings;

/// gRPC status codes ArgoCD embeds in error bodies.
const GRPC_NOT_FOUND: i64 = 5;
const GRPC_ALREADY_EXISTS: i64 = 6;
const GRPC_UNAUTHENTICATED: i64 = 16;

struct Session {
    http: reqwest::Client,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: i64,
    message: String,
    error: String,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    manifest: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

/// REST client for the ArgoCD API server.
pub struct HttpArgoCdClient {
    settings: ArgoCdSettings,
    base: Url,
    slot: Mutex<Option<Arc<Session>>>,
}

impl HttpArgoCdClient {
    /// Create a client. No connection is made until the first call.
    pub fn new(settings: ArgoCdSettings) -> Result<Self> {
        let base = Url::parse(&settings.server_url)
            .map_err(|e| ArgoCdError::InvalidUrl(format!("{}: {e}", settings.server_url)))?;
        if base.cannot_be_a_base() {
            return Err(ArgoCdError::InvalidUrl(settings.server_url.clone()));
        }
        Ok(Self {
            settings,
            base,
            slot: Mutex::new(None),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ArgoCdError::InvalidUrl(self.settings.server_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    async fn session(&self) -> Result<Arc<Session>> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let http = reqwest::Client::builder().build()?;
        let token = match &self.settings.token {
            Some(token) => token.clone(),
            None => self.login(&http).await?,
        };
        let session = Arc::new(Session { http, token });
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn login(&self, http: &reqwest::Client) -> Result<String> {
        let password = self
            .settings
            .password
            .clone()
            .ok_or_else(|| ArgoCdError::Unauthorized("no token or password configured".into()))?;
        let response = http
            .post(self.url(&["session"])?)
            .timeout(self.settings.timeout_fast)
            .json(&json!({"username": self.settings.username, "password": password}))
            .send()
            .await
            .map_err(|e| transport_error(e, "login"))?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }
        let session: SessionResponse = serde_json::from_slice(&body)?;
        info!(user = %self.settings.username, "Opened ArgoCD session");
        Ok(session.token)
    }

    async fn invalidate(&self) {
        self.slot.lock().await.take();
    }

    /// Send one request and decode the JSON body. An empty body decodes as `null`.
    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        timeout: Option<Duration>,
        operation: &'static str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Value> {
        let session = self.session().await?;
        let mut request = session
            .http
            .request(method, self.url(segments)?)
            .bearer_auth(&session.token);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = build(request)
            .send()
            .await
            .map_err(|e| transport_error(e, operation))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, operation))?;
        debug!(operation, status = status.as_u16(), "ArgoCD call finished");

        if status.is_success() {
            if body.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&body)?);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate().await;
        }
        Err(error_from_response(status, &body))
    }

    fn fast(&self) -> Option<Duration> {
        Some(self.settings.timeout_fast)
    }

    fn slow(&self) -> Option<Duration> {
        Some(self.settings.timeout_slow)
    }
}

fn transport_error(err: reqwest::Error, operation: &'static str) -> ArgoCdError {
    if err.is_timeout() {
        ArgoCdError::Timeout(operation)
    } else {
        ArgoCdError::Http(err)
    }
}

fn error_from_response(status: StatusCode, body: &[u8]) -> ArgoCdError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = if !parsed.message.is_empty() {
        parsed.message
    } else if !parsed.error.is_empty() {
        parsed.error
    } else {
        String::from_utf8_lossy(body).into_owned()
    };

    if status == StatusCode::NOT_FOUND || parsed.code == GRPC_NOT_FOUND {
        ArgoCdError::NotFound(message)
    } else if status == StatusCode::CONFLICT || parsed.code == GRPC_ALREADY_EXISTS {
        ArgoCdError::AlreadyExists(message)
    } else if status == StatusCode::UNAUTHORIZED || parsed.code == GRPC_UNAUTHENTICATED {
        ArgoCdError::Unauthorized(message)
    } else {
        ArgoCdError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl ArgoCdClient for HttpArgoCdClient {
    async fn resource_tree(&self, app_name: &str) -> Result<ApplicationTree> {
        let value = self
            .call(
                Method::GET,
                &["applications", app_name, "resource-tree"],
                None,
                "resource_tree",
                |r| r,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn get_resource(&self, query: &ResourceQuery) -> Result<Value> {
        let params = [
            ("resourceName", query.resource_name.as_str()),
            ("version", query.version.as_str()),
            ("kind", query.kind.as_str()),
            ("namespace", query.namespace.as_str()),
            ("group", query.group.as_str()),
        ];
        let value = self
            .call(
                Method::GET,
                &["applications", query.app_name.as_str(), "resource"],
                Some(RESOURCE_FETCH_TIMEOUT),
                "get_resource",
                |r| r.query(&params),
            )
            .await?;
        let response: ResourceResponse = serde_json::from_value(value)?;
        if response.manifest.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        Ok(serde_json::from_str(&response.manifest)?)
    }

    async fn get(&self, app_name: &str) -> Result<Application> {
        let value = self
            .call(Method::GET, &["applications", app_name], self.fast(), "get", |r| r)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn update(&self, app: &Application) -> Result<Application> {
        let value = self
            .call(
                Method::PUT,
                &["applications", app.metadata.name.as_str()],
                self.fast(),
                "update",
                |r| r.json(app),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn sync(&self, app_name: &str) -> Result<()> {
        self.call(
            Method::POST,
            &["applications", app_name, "sync"],
            self.fast(),
            "sync",
            |r| r.json(&json!({"name": app_name})),
        )
        .await?;
        Ok(())
    }

    async fn patch(&self, app_name: &str, patch: &Value) -> Result<Application> {
        let body = json!({
            "name": app_name,
            "patch": patch.to_string(),
            "patchType": "merge",
        });
        let value = self
            .call(
                Method::PATCH,
                &["applications", app_name],
                self.fast(),
                "patch",
                |r| r.json(&body),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn terminate_operation(&self, app_name: &str) -> Result<()> {
        self.call(
            Method::DELETE,
            &["applications", app_name, "operation"],
            self.fast(),
            "terminate_operation",
            |r| r,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, app_name: &str, cascade: bool) -> Result<()> {
        let cascade = if cascade { "true" } else { "false" };
        self.call(
            Method::DELETE,
            &["applications", app_name],
            self.slow(),
            "delete",
            |r| r.query(&[("cascade", cascade)]),
        )
        .await?;
        Ok(())
    }

    async fn create_application(&self, template: &AppTemplate) -> Result<String> {
        let application = template.to_application();
        self.call(
            Method::POST,
            &["applications"],
            self.slow(),
            "create_application",
            |r| r.json(&application),
        )
        .await?;
        info!(application = %template.application_name, "ArgoCD application created");
        Ok(template.application_name.clone())
    }

    async fn register_repository(&self, repo_url: &str) -> Result<()> {
        self.call(
            Method::POST,
            &["repositories"],
            self.slow(),
            "register_repository",
            |r| {
                r.query(&[("upsert", "true")])
                    .json(&json!({"repo": repo_url, "type": "git"}))
            },
        )
        .await?;
        Ok(())
    }

    async fn teardown(&self) {
        if self.slot.lock().await.take().is_some() {
            debug!("ArgoCD session dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argocd::types::ResourceNode;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> HttpArgoCdClient {
        HttpArgoCdClient::new(ArgoCdSettings {
            server_url: server.uri(),
            token: token.map(str::to_string),
            password: Some("secret".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_resource_tree_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/nginx-prod/resource-tree"))
            .and(header("authorization", "Bearer static-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{"kind": "Deployment", "name": "nginx", "version": "v1", "group": "apps"}]
            })))
            .mount(&server)
            .await;

        let tree = client(&server, Some("static-token"))
            .resource_tree("nginx-prod")
            .await
            .unwrap();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].kind, "Deployment");
    }

    #[tokio::test]
    async fn test_login_once_then_reuse_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .and(body_json(json!({"username": "admin", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "jwt"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications/nginx-prod/sync"))
            .and(header("authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server, None);
        client.sync("nginx-prod").await.unwrap();
        client.sync("nginx-prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_forces_new_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "jwt"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/applications/nginx-prod/operation"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = client(&server, None);
        client.terminate_operation("nginx-prod").await.unwrap();
        client.teardown().await;
        client.terminate_operation("nginx-prod").await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_from_status_and_grpc_code() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/applications/gone"))
            .and(query_param("cascade", "true"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "applications.argoproj.io \"gone\" not found", "code": 5
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/also-gone"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "message": "app not found", "code": 5
            })))
            .mount(&server)
            .await;

        let client = client(&server, Some("t"));
        let err = client.delete("gone", true).await.unwrap_err();
        assert!(err.is_not_found());
        let err = client.get("also-gone").await.unwrap_err();
        assert!(matches!(err, ArgoCdError::NotFound(ref m) if m == "app not found"));
    }

    #[tokio::test]
    async fn test_create_application_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/applications"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "message": "existing application spec is different", "code": 6
            })))
            .mount(&server)
            .await;

        let template = AppTemplate {
            application_name: "nginx-prod".to_string(),
            namespace: "devtroncd".to_string(),
            target_namespace: "prod".to_string(),
            target_server: "https://k8s".to_string(),
            project: "default".to_string(),
            values_file: "values.yaml".to_string(),
            repo_path: "nginx-prod".to_string(),
            repo_url: "https://git/nginx.git".to_string(),
        };
        let err = client(&server, Some("t"))
            .create_application(&template)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_patch_sends_merge_patch_envelope() {
        let server = MockServer::start().await;
        let patch = json!({"spec": {"source": {"path": "p", "repoURL": "u"}}});
        Mock::given(method("PATCH"))
            .and(path("/api/v1/applications/nginx-prod"))
            .and(body_json(json!({
                "name": "nginx-prod",
                "patch": patch.to_string(),
                "patchType": "merge"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"name": "nginx-prod"},
                "spec": {"source": {"path": "p", "repoURL": "u"}}
            })))
            .mount(&server)
            .await;

        let app = client(&server, Some("t"))
            .patch("nginx-prod", &patch)
            .await
            .unwrap();
        assert_eq!(app.spec.source.repo_url, "u");
    }

    #[tokio::test]
    async fn test_get_resource_decodes_manifest_string() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/applications/nginx-prod/resource"))
            .and(query_param("resourceName", "nginx"))
            .and(query_param("kind", "Deployment"))
            .and(query_param("group", "apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "manifest": "{\"kind\":\"Deployment\",\"status\":{\"collisionCount\":0}}"
            })))
            .mount(&server)
            .await;

        let node = ResourceNode {
            kind: "Deployment".to_string(),
            name: "nginx".to_string(),
            group: "apps".to_string(),
            version: "v1".to_string(),
            namespace: "prod".to_string(),
            ..Default::default()
        };
        let manifest = client(&server, Some("t"))
            .get_resource(&ResourceQuery::for_node("nginx-prod", &node))
            .await
            .unwrap();
        assert_eq!(manifest["status"]["collisionCount"], 0);
    }

    #[tokio::test]
    async fn test_register_repository_upserts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repositories"))
            .and(query_param("upsert", "true"))
            .and(body_json(json!({"repo": "https://git/nginx.git", "type": "git"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"repo": "https://git/nginx.git"})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, Some("t"))
            .register_repository("https://git/nginx.git")
            .await
            .unwrap();
    }

    #[test]
    fn test_invalid_server_url() {
        let result = HttpArgoCdClient::new(ArgoCdSettings {
            server_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ArgoCdError::InvalidUrl(_))));
    }
}
