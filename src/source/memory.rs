//! Fixed-answer source provider

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Branch, RepositoryInfo, SourceControl, SourceError, SourceResult};

struct Entry {
    info: RepositoryInfo,
    branches: Vec<Branch>,
    /// branch -> recipe paths present on it
    recipes: HashMap<String, Vec<String>>,
}

/// Source provider that serves registered repositories
#[derive(Default)]
pub struct StaticSource {
    repos: DashMap<String, Entry>,
    failure: Mutex<Option<SourceError>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository; `recipe` is the build recipe present on every
    /// listed branch, if any
    pub fn with_repository(
        self,
        owner: &str,
        name: &str,
        branches: &[&str],
        recipe: Option<&str>,
    ) -> Self {
        let full_name = format!("{}/{}", owner, name);
        let info = RepositoryInfo {
            owner: owner.to_string(),
            name: name.to_string(),
            full_name: full_name.clone(),
            clone_url: format!("https://github.com/{}.git", full_name),
            private: false,
            language: None,
            description: None,
            default_branch: branches.first().copied().unwrap_or("main").to_string(),
        };
        let recipes = branches
            .iter()
            .map(|b| (b.to_string(), recipe.map(|r| vec![r.to_string()]).unwrap_or_default()))
            .collect();
        let branches = branches
            .iter()
            .map(|b| Branch {
                name: b.to_string(),
                commit_sha: format!("{:040}", 0),
                protected: false,
            })
            .collect();

        self.repos.insert(
            full_name,
            Entry {
                info,
                branches,
                recipes,
            },
        );
        self
    }

    /// Fail every subsequent call with `error`
    pub fn fail_with(&self, error: SourceError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    fn check(&self) -> SourceResult<()> {
        match self.failure.lock().ok().and_then(|f| f.clone()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SourceControl for StaticSource {
    async fn repository(&self, _token: &str, owner: &str, repo: &str) -> SourceResult<RepositoryInfo> {
        self.check()?;
        let full_name = format!("{}/{}", owner, repo);
        self.repos
            .get(&full_name)
            .map(|e| e.info.clone())
            .ok_or(SourceError::RepositoryNotFound(full_name))
    }

    async fn branches(&self, _token: &str, owner: &str, repo: &str) -> SourceResult<Vec<Branch>> {
        self.check()?;
        let full_name = format!("{}/{}", owner, repo);
        self.repos
            .get(&full_name)
            .map(|e| e.branches.clone())
            .ok_or(SourceError::RepositoryNotFound(full_name))
    }

    async fn find_build_recipe(
        &self,
        _token: &str,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> SourceResult<Option<String>> {
        self.check()?;
        let full_name = format!("{}/{}", owner, repo);
        let entry = self
            .repos
            .get(&full_name)
            .ok_or(SourceError::RepositoryNotFound(full_name))?;
        Ok(entry
            .recipes
            .get(branch)
            .and_then(|paths| paths.first().cloned()))
    }
}
