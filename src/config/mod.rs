//! Server settings
//!
//! Settings come from an optional YAML file, then environment variables
//! override individual fields. Parsing and override application are pure;
//! `load_settings` is the I/O boundary.

pub mod defaults;

pub use defaults::{validate_config, DeploymentDefaults};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deployment::naming::derive_name;
use crate::source::{github::DEFAULT_API_URL, DEFAULT_RECIPE_PATHS};

/// Errors for loading settings
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub port: u16,
    /// Per-request deadline; unlimited when unset
    pub request_timeout_secs: Option<u64>,
    /// Maximum in-flight requests; unlimited when unset
    pub concurrency_limit: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: Some(30),
            concurrency_limit: Some(100),
        }
    }
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Kubeconfig path; inferred when unset
    pub kubeconfig: Option<String>,
    /// Use the in-process cluster instead of an API server
    pub in_memory: bool,
    pub default_namespace: String,
    /// Value of the `managed-by` label on every created object
    pub managed_by: String,
    /// Prefix of external URLs (`<base><contextPath>`)
    pub ingress_base_url: String,
    pub ingress_class: Option<String>,
    pub connect_timeout_secs: u64,
    /// Undo completed provisioning steps when a later step fails
    pub rollback_on_failure: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            in_memory: false,
            default_namespace: "nodedeployer-apps".to_string(),
            managed_by: "nodedeployer".to_string(),
            ingress_base_url: "http://localhost".to_string(),
            ingress_class: None,
            connect_timeout_secs: 5,
            rollback_on_failure: true,
        }
    }
}

impl ClusterSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Kubeconfig path with `~` and env vars expanded
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub recipe_paths: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 15,
            recipe_paths: DEFAULT_RECIPE_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Simulated image build duration
    pub build_delay_secs: u64,
    /// Period of the background reconciler; disabled when unset
    pub reconcile_interval_secs: Option<u64>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            build_delay_secs: 5,
            reconcile_interval_secs: None,
        }
    }
}

/// All settings of the deployer server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub cluster: ClusterSettings,
    pub source: SourceSettings,
    pub lifecycle: LifecycleSettings,
    pub defaults: DeploymentDefaults,
}

// ============================================================================
// Pure parsing and overrides
// ============================================================================

impl Settings {
    /// Parse settings from YAML
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = lookup("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("KUBECONFIG") {
            self.cluster.kubeconfig = Some(v);
        }
        if let Some(v) = lookup("DEFAULT_NAMESPACE") {
            self.cluster.default_namespace = v;
        }
        if let Some(v) = lookup("INGRESS_BASE_URL") {
            self.cluster.ingress_base_url = v;
        }
        if let Some(v) = lookup("GITHUB_API_URL") {
            self.source.api_url = v;
        }
        if let Some(v) = lookup("BUILD_DELAY_SECS") {
            self.lifecycle.build_delay_secs = parse_env("BUILD_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("RECONCILE_INTERVAL_SECS") {
            self.lifecycle.reconcile_interval_secs =
                Some(parse_env("RECONCILE_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("DEFAULT_REPLICAS") {
            self.defaults.replicas = parse_env("DEFAULT_REPLICAS", &v)?;
        }
        if let Some(v) = lookup("DEFAULT_MEMORY_REQUEST") {
            self.defaults.memory_request = v;
        }
        if let Some(v) = lookup("DEFAULT_MEMORY_LIMIT") {
            self.defaults.memory_limit = v;
        }
        if let Some(v) = lookup("DEFAULT_CPU_REQUEST") {
            self.defaults.cpu_request = v;
        }
        if let Some(v) = lookup("DEFAULT_CPU_LIMIT") {
            self.defaults.cpu_limit = v;
        }
        Ok(())
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ns = &self.cluster.default_namespace;
        if ns.is_empty() || derive_name(ns) != *ns {
            return Err(ConfigError::Invalid(format!(
                "default namespace '{}' is not a valid DNS label",
                ns
            )));
        }
        if self.defaults.replicas < 0 {
            return Err(ConfigError::Invalid(
                "default replicas must not be negative".to_string(),
            ));
        }
        for (key, value) in [
            ("defaults.memory_request", &self.defaults.memory_request),
            ("defaults.memory_limit", &self.defaults.memory_limit),
            ("defaults.cpu_request", &self.defaults.cpu_request),
            ("defaults.cpu_limit", &self.defaults.cpu_limit),
        ] {
            if !crate::cluster::quantity::is_valid_quantity(value) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a valid quantity",
                    key, value
                )));
            }
        }
        Ok(())
    }

    pub fn build_delay(&self) -> Duration {
        Duration::from_secs(self.lifecycle.build_delay_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        self.lifecycle
            .reconcile_interval_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Read the settings file (if any), then apply process environment overrides
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            let content = std::fs::read_to_string(expanded)?;
            Settings::from_yaml(&content)?
        }
        None => Settings::default(),
    };
    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}
