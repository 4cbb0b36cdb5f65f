//! Source-control provider access
//!
//! The lifecycle core needs repository metadata and a build recipe check;
//! branch listing backs the repository browsing endpoints.
//! `GitHubClient` talks to the GitHub REST API; `StaticSource` serves fixed
//! answers for local runs and tests.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use github::GitHubClient;
pub use memory::StaticSource;

/// Candidate build recipe locations, checked in order
pub const DEFAULT_RECIPE_PATHS: [&str; 3] = ["Dockerfile", "dockerfile", ".docker/Dockerfile"];

/// Errors from the source-control provider
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("repository '{0}' not found or not accessible")]
    RepositoryNotFound(String),

    #[error("source provider rejected the token: {0}")]
    Unauthorized(String),

    #[error("source provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("source provider request failed: {0}")]
    Transport(String),

    #[error("unexpected response from source provider: {0}")]
    Decode(String),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Repository metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub default_branch: String,
}

/// A repository branch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub name: String,
    pub commit_sha: String,
    pub protected: bool,
}

/// Operations needed from a source-control provider
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Repository metadata visible to the token
    async fn repository(&self, token: &str, owner: &str, repo: &str)
        -> SourceResult<RepositoryInfo>;

    async fn branches(&self, token: &str, owner: &str, repo: &str) -> SourceResult<Vec<Branch>>;

    /// Path of the first build recipe found on `branch`.
    ///
    /// `Ok(None)` means every candidate path is absent; provider or transport
    /// failures are reported as errors, never as absence.
    async fn find_build_recipe(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> SourceResult<Option<String>>;
}
