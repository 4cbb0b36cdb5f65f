//! CLI contexts, kept in `~/.nodedeployer/config`
//!
//! A context names a deployer API endpoint plus the identity the CLI sends
//! with it. `local` is built in and points at a server on this machine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the built-in context
pub const LOCAL_CONTEXT: &str = "local";

/// Default port of a local deployer server
pub const DEFAULT_LOCAL_PORT: u16 = 8080;

/// Default config file location: ~/.nodedeployer/config
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nodedeployer")
        .join("config")
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    #[error("Context '{0}' is built in and cannot be changed")]
    BuiltIn(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A named deployer endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    /// Base URL of the deployer API, e.g. `https://deployer.example.com`
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sent as `X-User-Id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Sent as `X-Source-Token` when creating deployments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "current-context")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,

    #[serde(default)]
    pub contexts: BTreeMap<String, Context>,

    #[serde(default)]
    pub local: LocalConfig,
}

/// Where the built-in `local` context points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_port")]
    pub port: u16,
    #[serde(default = "default_local_host")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LOCAL_PORT,
            host: default_local_host(),
            user_id: None,
        }
    }
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

pub fn parse_config(content: &str) -> Result<Config, ContextError> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(content).map_err(|e| ContextError::ParseError(e.to_string()))
}

pub fn serialize_config(config: &Config) -> Result<String, ContextError> {
    serde_yaml::to_string(config).map_err(|e| ContextError::WriteError(e.to_string()))
}

/// Add or replace a context
pub fn add_context(config: &mut Config, context: Context) -> Result<(), ContextError> {
    if context.name == LOCAL_CONTEXT {
        return Err(ContextError::BuiltIn(context.name));
    }
    config.contexts.insert(context.name.clone(), context);
    Ok(())
}

/// Remove a context; falls back to `local` if it was current
pub fn remove_context(config: &mut Config, name: &str) -> Result<Context, ContextError> {
    let removed = config
        .contexts
        .remove(name)
        .ok_or_else(|| ContextError::ContextNotFound(name.to_string()))?;
    if config.current_context.as_deref() == Some(name) {
        config.current_context = None;
    }
    Ok(removed)
}

pub fn set_current_context(config: &mut Config, name: &str) -> Result<(), ContextError> {
    if name != LOCAL_CONTEXT && !config.contexts.contains_key(name) {
        return Err(ContextError::ContextNotFound(name.to_string()));
    }
    config.current_context = Some(name.to_string());
    Ok(())
}

/// Context names, built-in first
pub fn list_contexts(config: &Config) -> Vec<&str> {
    std::iter::once(LOCAL_CONTEXT)
        .chain(config.contexts.keys().map(|s| s.as_str()))
        .collect()
}

impl Config {
    pub fn current_name(&self) -> &str {
        self.current_context.as_deref().unwrap_or(LOCAL_CONTEXT)
    }

    /// The context requests go to
    pub fn current(&self) -> Result<Context, ContextError> {
        match self.current_name() {
            LOCAL_CONTEXT => Ok(Context {
                name: LOCAL_CONTEXT.to_string(),
                url: format!("http://{}:{}", self.local.host, self.local.port),
                api_key: None,
                user_id: self.local.user_id.clone(),
                source_token: None,
                description: Some("deployer on this machine".to_string()),
            }),
            name => self
                .contexts
                .get(name)
                .cloned()
                .ok_or_else(|| ContextError::ContextNotFound(name.to_string())),
        }
    }

    pub fn is_local(&self) -> bool {
        self.current_name() == LOCAL_CONTEXT
    }
}

impl Context {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            api_key: None,
            user_id: None,
            source_token: None,
            description: None,
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

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

// ============================================================================
// I/O boundary functions
// ============================================================================

pub fn load_config() -> Result<Config, ContextError> {
    load_config_from(&default_config_path())
}

/// A missing file is an empty config
pub fn load_config_from(path: &Path) -> Result<Config, ContextError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn save_config(config: &Config) -> Result<(), ContextError> {
    save_config_to(config, &default_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serialize_config(config)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_local() {
        let config = Config::default();
        assert!(config.is_local());
        let current = config.current().unwrap();
        assert_eq!(current.url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
current-context: prod
contexts:
  prod:
    name: prod
    url: https://deployer.example.com
    user_id: u-42
    source_token: ghp_abc
local:
  port: 9090
"#;
        let config = parse_config(yaml).unwrap();
        let current = config.current().unwrap();
        assert_eq!(current.url, "https://deployer.example.com");
        assert_eq!(current.user_id.as_deref(), Some("u-42"));
        assert_eq!(config.local.port, 9090);
        assert_eq!(config.local.host, "127.0.0.1");
    }

    #[test]
    fn test_local_is_reserved() {
        let mut config = Config::default();
        let result = add_context(&mut config, Context::new("local", "http://x"));
        assert!(matches!(result, Err(ContextError::BuiltIn(_))));
        assert!(set_current_context(&mut config, "local").is_ok());
    }

    #[test]
    fn test_remove_current_falls_back_to_local() {
        let mut config = Config::default();
        add_context(&mut config, Context::new("staging", "http://10.0.0.5:8080")).unwrap();
        set_current_context(&mut config, "staging").unwrap();

        remove_context(&mut config, "staging").unwrap();
        assert!(config.is_local());
        assert!(matches!(
            remove_context(&mut config, "staging"),
            Err(ContextError::ContextNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_current_context() {
        let mut config = Config::default();
        assert!(set_current_context(&mut config, "nope").is_err());
        config.current_context = Some("gone".into());
        assert!(config.current().is_err());
    }

    #[test]
    fn test_list_contexts_sorted_after_builtin() {
        let mut config = Config::default();
        add_context(&mut config, Context::new("zeta", "http://z")).unwrap();
        add_context(&mut config, Context::new("alpha", "http://a")).unwrap();
        assert_eq!(list_contexts(&config), vec!["local", "alpha", "zeta"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config");

        let mut config = Config::default();
        add_context(
            &mut config,
            Context::new("prod", "https://deployer.example.com")
                .with_api_key("k")
                .with_user_id("u-1")
                .with_source_token("ghp_x")
                .with_description("production"),
        )
        .unwrap();
        set_current_context(&mut config, "prod").unwrap();
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(load_config_from(&dir.path().join("missing")).unwrap().is_local());
    }
}
