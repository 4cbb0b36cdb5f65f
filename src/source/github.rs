//! GitHub REST API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{
    Branch, RepositoryInfo, SourceControl, SourceError, SourceResult, DEFAULT_RECIPE_PATHS,
};

/// Default public API endpoint
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub client using a per-request caller token
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
    recipe_paths: Vec<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> SourceResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nodedeployer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            recipe_paths: DEFAULT_RECIPE_PATHS.iter().map(|p| p.to_string()).collect(),
        })
    }

    /// Override the candidate recipe paths
    pub fn with_recipe_paths(mut self, paths: Vec<String>) -> Self {
        if !paths.is_empty() {
            self.recipe_paths = paths;
        }
        self
    }

    fn get(&self, token: &str, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        let mut req = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if !token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> SourceResult<reqwest::Response> {
        req.send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))
    }
}

/// Turn a non-success response into an error
async fn status_error(resp: reqwest::Response, subject: &str) -> SourceError {
    let status = resp.status();
    let message = resp
        .json::<ApiMessage>()
        .await
        .map(|m| m.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

    match status {
        StatusCode::NOT_FOUND => SourceError::RepositoryNotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unauthorized(message),
        other => SourceError::Http {
            status: other.as_u16(),
            message,
        },
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    owner: ApiOwner,
    clone_url: String,
    #[serde(default)]
    private: bool,
    language: Option<String>,
    description: Option<String>,
    default_branch: String,
}

impl From<ApiRepository> for RepositoryInfo {
    fn from(repo: ApiRepository) -> Self {
        Self {
            owner: repo.owner.login,
            name: repo.name,
            full_name: repo.full_name,
            clone_url: repo.clone_url,
            private: repo.private,
            language: repo.language,
            description: repo.description,
            default_branch: repo.default_branch,
        }
    }
}

#[derive(Deserialize)]
struct ApiCommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct ApiBranch {
    name: String,
    commit: ApiCommitRef,
    #[serde(default)]
    protected: bool,
}

#[async_trait]
impl SourceControl for GitHubClient {
    async fn repository(&self, token: &str, owner: &str, repo: &str) -> SourceResult<RepositoryInfo> {
        let subject = format!("{}/{}", owner, repo);
        let resp = self
            .send(self.get(token, &format!("/repos/{}/{}", owner, repo)))
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &subject).await);
        }

        let api: ApiRepository = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(api.into())
    }

    async fn branches(&self, token: &str, owner: &str, repo: &str) -> SourceResult<Vec<Branch>> {
        let subject = format!("{}/{}", owner, repo);
        let resp = self
            .send(
                self.get(token, &format!("/repos/{}/{}/branches", owner, repo))
                    .query(&[("per_page", "100")]),
            )
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp, &subject).await);
        }

        let api: Vec<ApiBranch> = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(api
            .into_iter()
            .map(|b| Branch {
                name: b.name,
                commit_sha: b.commit.sha,
                protected: b.protected,
            })
            .collect())
    }

    async fn find_build_recipe(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> SourceResult<Option<String>> {
        for path in &self.recipe_paths {
            let resp = self
                .send(
                    self.get(token, &format!("/repos/{}/{}/contents/{}", owner, repo, path))
                        .query(&[("ref", branch)]),
                )
                .await?;

            match resp.status() {
                status if status.is_success() => {
                    debug!("Found build recipe {} in {}/{}@{}", path, owner, repo, branch);
                    return Ok(Some(path.clone()));
                }
                StatusCode::NOT_FOUND => continue,
                _ => return Err(status_error(resp, &format!("{}/{}", owner, repo)).await),
            }
        }

        Ok(None)
    }
}
