//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::cluster::{ClusterSummary, OperationStatus, ResourceList};
use crate::context::{self, Config, Context, ContextError};
use crate::deployment::{
    CreateDeploymentRequest, DeploymentMetrics, DeploymentRecord, DeploymentStats,
};
use crate::server::handlers::{
    DeploymentResponse, LogsResponse, SOURCE_TOKEN_HEADER, USER_ID_HEADER,
};
use crate::source::{Branch, RepositoryInfo};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Missing {0}: set it on the context or pass it explicitly")]
    MissingCredential(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Context Commands (Pure business logic)
// ============================================================================

/// Info about a context for display
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub name: String,
    pub url: String,
    pub is_current: bool,
}

/// List all contexts, built-in first
pub fn context_list(config: &Config) -> Vec<ContextInfo> {
    let current = config.current_name();
    context::list_contexts(config)
        .into_iter()
        .map(|name| {
            let url = if name == context::LOCAL_CONTEXT {
                format!("http://{}:{}", config.local.host, config.local.port)
            } else {
                config
                    .contexts
                    .get(name)
                    .map(|c| c.url.clone())
                    .unwrap_or_default()
            };
            ContextInfo {
                name: name.to_string(),
                url,
                is_current: name == current,
            }
        })
        .collect()
}

/// Current context name and URL
pub fn context_current(config: &Config) -> CommandResult<(String, String)> {
    let ctx = config.current()?;
    Ok((ctx.name, ctx.url))
}

pub fn context_use(config: &mut Config, name: &str) -> CommandResult<()> {
    context::set_current_context(config, name)?;
    Ok(())
}

/// Add (or replace) a context
pub fn context_add(
    config: &mut Config,
    name: &str,
    url: &str,
    api_key: Option<&str>,
    user_id: Option<&str>,
    source_token: Option<&str>,
) -> CommandResult<()> {
    let mut ctx = Context::new(name, url.trim_end_matches('/'));
    if let Some(key) = api_key {
        ctx = ctx.with_api_key(key);
    }
    if let Some(user) = user_id {
        ctx = ctx.with_user_id(user);
    }
    if let Some(token) = source_token {
        ctx = ctx.with_source_token(token);
    }
    context::add_context(config, ctx)?;
    Ok(())
}

pub fn context_delete(config: &mut Config, name: &str) -> CommandResult<()> {
    context::remove_context(config, name)?;
    Ok(())
}

// ============================================================================
// Deploy Commands
// ============================================================================

/// Parse a deployment manifest; `.yaml`/`.yml` files are YAML, anything else JSON
pub fn parse_deploy_manifest(content: &str, yaml: bool) -> CommandResult<CreateDeploymentRequest> {
    if yaml {
        serde_yaml::from_str(content).map_err(|e| CommandError::Manifest(e.to_string()))
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

/// Load and parse a deployment manifest
pub fn load_deploy_manifest(path: &Path) -> CommandResult<CreateDeploymentRequest> {
    let content = std::fs::read_to_string(path)?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    parse_deploy_manifest(&content, yaml)
}

/// Split an `owner/name` repository argument
pub fn parse_repository_slug(slug: &str) -> CommandResult<(&str, &str)> {
    match slug.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(CommandError::InvalidArgument(format!(
            "expected a repository as owner/name, got '{}'",
            slug
        ))),
    }
}

// ============================================================================
// HTTP Client for the deployer API
// ============================================================================

/// Client for a deployer server
pub struct DeployerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    user_id: Option<String>,
    source_token: Option<String>,
}

impl DeployerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
            user_id: None,
            source_token: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_source_token(mut self, token: impl Into<String>) -> Self {
        self.source_token = Some(token.into());
        self
    }

    /// Create from the current context
    pub fn from_context(config: &Config) -> CommandResult<Self> {
        let ctx = config.current()?;
        let mut client = Self::new(ctx.url);
        if let Some(key) = ctx.api_key {
            client = client.with_api_key(key);
        }
        if let Some(user) = ctx.user_id {
            client = client.with_user_id(user);
        }
        if let Some(token) = ctx.source_token {
            client = client.with_source_token(token);
        }
        Ok(client)
    }

    fn build_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref user) = self.user_id {
            req = req.header(USER_ID_HEADER, user);
        }
        req
    }

    /// Decode a success body, or turn the `error` field into `CommandError::Server`
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> CommandResult<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(CommandError::Server {
            status: status.as_u16(),
            message: server_error_message(&body),
        })
    }

    /// Create a deployment owned by `node_id`
    pub async fn create(
        &self,
        node_id: &str,
        request: &CreateDeploymentRequest,
    ) -> CommandResult<DeploymentRecord> {
        let token = self
            .source_token
            .as_deref()
            .ok_or(CommandError::MissingCredential("source token"))?;
        let resp = self
            .build_request(reqwest::Method::POST, "/v1/deployments")
            .query(&[("nodeId", node_id)])
            .header(SOURCE_TOKEN_HEADER, token)
            .json(request)
            .send()
            .await?;
        let body: DeploymentResponse = Self::decode(resp).await?;
        Ok(body.deployment)
    }

    /// List deployments matching the given filters
    pub async fn list(&self, filters: &[(&str, &str)]) -> CommandResult<Vec<DeploymentRecord>> {
        let resp = self
            .build_request(reqwest::Method::GET, "/v1/deployments")
            .query(filters)
            .send()
            .await?;
        let list: ResourceList<DeploymentRecord> = Self::decode(resp).await?;
        Ok(list.items)
    }

    pub async fn get(&self, id: &str) -> CommandResult<DeploymentRecord> {
        let path = format!("/v1/deployments/{}", id);
        let resp = self.build_request(reqwest::Method::GET, &path).send().await?;
        let body: DeploymentResponse = Self::decode(resp).await?;
        Ok(body.deployment)
    }

    pub async fn delete(&self, id: &str) -> CommandResult<OperationStatus> {
        let path = format!("/v1/deployments/{}", id);
        let resp = self
            .build_request(reqwest::Method::DELETE, &path)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn scale(&self, id: &str, replicas: i32) -> CommandResult<DeploymentRecord> {
        let path = format!("/v1/deployments/{}/scale", id);
        let resp = self
            .build_request(reqwest::Method::POST, &path)
            .json(&serde_json::json!({ "replicas": replicas }))
            .send()
            .await?;
        let body: DeploymentResponse = Self::decode(resp).await?;
        Ok(body.deployment)
    }

    /// POST a bodyless action (`restart`, `retry`, `cancel`)
    pub async fn action(&self, id: &str, action: &str) -> CommandResult<DeploymentRecord> {
        let path = format!("/v1/deployments/{}/{}", id, action);
        let resp = self
            .build_request(reqwest::Method::POST, &path)
            .send()
            .await?;
        let body: DeploymentResponse = Self::decode(resp).await?;
        Ok(body.deployment)
    }

    /// Refresh metrics from the cluster
    pub async fn reconcile(&self, id: &str) -> CommandResult<DeploymentMetrics> {
        let path = format!("/v1/deployments/{}/reconcile", id);
        let resp = self
            .build_request(reqwest::Method::POST, &path)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn stats(&self, node_id: Option<&str>) -> CommandResult<DeploymentStats> {
        let mut req = self.build_request(reqwest::Method::GET, "/v1/deployments/stats");
        if let Some(node) = node_id {
            req = req.query(&[("nodeId", node)]);
        }
        Self::decode(req.send().await?).await
    }

    /// Fetch the `items` of a resource list endpoint
    pub async fn items<T: DeserializeOwned>(&self, path: &str) -> CommandResult<Vec<T>> {
        let resp = self.build_request(reqwest::Method::GET, path).send().await?;
        let list: ResourceList<T> = Self::decode(resp).await?;
        Ok(list.items)
    }

    /// GET with the source token attached when the context carries one
    fn source_request(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.build_request(reqwest::Method::GET, path);
        match self.source_token {
            Some(ref token) => req.header(SOURCE_TOKEN_HEADER, token),
            None => req,
        }
    }

    pub async fn repository(&self, owner: &str, repo: &str) -> CommandResult<RepositoryInfo> {
        let path = format!("/v1/repositories/{}/{}", owner, repo);
        Self::decode(self.source_request(&path).send().await?).await
    }

    pub async fn branches(&self, owner: &str, repo: &str) -> CommandResult<Vec<Branch>> {
        let path = format!("/v1/repositories/{}/{}/branches", owner, repo);
        let resp = self.source_request(&path).send().await?;
        let list: ResourceList<Branch> = Self::decode(resp).await?;
        Ok(list.items)
    }

    pub async fn cluster_status(&self) -> CommandResult<ClusterSummary> {
        let resp = self
            .build_request(reqwest::Method::GET, "/v1/cluster/info")
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn logs(&self, namespace: &str, pod: &str, tail: i64) -> CommandResult<String> {
        let path = format!("/v1/namespaces/{}/pods/{}/logs", namespace, pod);
        let resp = self
            .build_request(reqwest::Method::GET, &path)
            .query(&[("tail", tail)])
            .send()
            .await?;
        let body: LogsResponse = Self::decode(resp).await?;
        Ok(body.logs)
    }
}

/// The `error` (or `message`) field of an error body, else the body itself
pub fn server_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
