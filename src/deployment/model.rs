//! Deployment record and its nested configuration types

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::naming::{derive_name, ResourceNames};

/// Deployment identifier, assigned by the store
pub type DeploymentId = Uuid;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Deploying,
    Running,
    Failed,
    Stopped,
    Updating,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 7] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
        DeploymentStatus::Running,
        DeploymentStatus::Failed,
        DeploymentStatus::Stopped,
        DeploymentStatus::Updating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Updating => "updating",
        }
    }

    /// Whether the state machine has an edge from `self` to `next`.
    ///
    /// Stopped is reachable from anywhere by explicit delete; Failed only
    /// leaves through an explicit retry.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (*self, next),
            (_, Stopped)
                | (Pending, Building)
                | (Pending, Failed)
                | (Building, Deploying)
                | (Building, Failed)
                | (Deploying, Running)
                | (Deploying, Failed)
                | (Running, Updating)
                | (Updating, Running)
                | (Updating, Failed)
                | (Failed, Pending)
        )
    }

    /// True while the creation task still owns the record
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Pending | DeploymentStatus::Building | DeploymentStatus::Deploying
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentStatus::ALL
            .iter()
            .find(|status| status.as_str() == s.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| format!("unknown deployment status '{}'", s))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Resolved configuration of a deployment (all defaults applied)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub replicas: i32,
    pub container_port: i32,
    pub service_port: i32,
    pub memory_request: String,
    pub memory_limit: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    #[serde(default)]
    pub environment_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<AutoScalingConfig>,
    pub health_check: HealthCheckConfig,
    pub image_pull_policy: String,
    pub restart_policy: String,
    pub build: BuildConfig,
}

/// Horizontal scaling policy (stored, not enforced)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalingConfig {
    pub enabled: bool,
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_cpu_percent: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_memory_percent: Option<i32>,
}

/// HTTP probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub path: String,
    pub port: i32,
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
    pub timeout_seconds: i32,
    pub success_threshold: i32,
    pub failure_threshold: i32,
}

/// Image build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    pub dockerfile: String,
    pub build_context: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    pub image_name: String,
    pub image_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
}

impl BuildConfig {
    /// Full image reference used by the workload container
    pub fn image_ref(&self) -> String {
        match &self.registry_url {
            Some(registry) if !registry.is_empty() => format!(
                "{}/{}:{}",
                registry.trim_end_matches('/'),
                self.image_name,
                self.image_tag
            ),
            _ => format!("{}:{}", self.image_name, self.image_tag),
        }
    }
}

// ============================================================================
// Source, cluster info and metrics
// ============================================================================

/// Repository metadata captured once at creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub branch: String,
    pub clone_url: String,
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Names and URLs of the cluster objects that exist for a deployment.
///
/// A name is only recorded after the object was created and not rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub workload_name: String,
    #[serde(default)]
    pub config_map_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub ingress_name: String,
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub internal_url: String,
    #[serde(default)]
    pub pod_selector: String,
}

impl ClusterInfo {
    pub fn is_empty(&self) -> bool {
        self.workload_name.is_empty()
            && self.config_map_name.is_empty()
            && self.service_name.is_empty()
            && self.ingress_name.is_empty()
    }
}

/// Observed runtime metrics, overwritten wholesale on each reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetrics {
    pub active_pods: i32,
    pub desired_pods: i32,
    pub ready_pods: i32,
    /// Millicores summed over active pods
    pub cpu_usage: u64,
    /// Bytes summed over active pods
    pub memory_usage: u64,
    pub network_in: u64,
    pub network_out: u64,
    pub requests_per_minute: f64,
    pub error_rate: f64,
    pub uptime_seconds: i64,
    pub restart_count: i32,
}

// ============================================================================
// Record
// ============================================================================

/// Persisted deployment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub user_id: String,
    pub node_id: String,
    pub name: String,
    pub context_path: String,
    pub namespace: String,
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub source: SourceSnapshot,
    pub configuration: DeploymentConfig,
    #[serde(default)]
    pub cluster_info: ClusterInfo,
    #[serde(default)]
    pub metrics: DeploymentMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn canonical_name(&self) -> String {
        derive_name(&self.name)
    }

    pub fn resource_names(&self) -> ResourceNames {
        ResourceNames::from_display_name(&self.name)
    }
}

/// Deployment counts per status for one node or the whole system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStats {
    pub total: usize,
    #[serde(flatten)]
    pub by_status: BTreeMap<String, usize>,
}

impl DeploymentStats {
    /// Start from zero for every known status
    pub fn zeroed() -> Self {
        Self {
            total: 0,
            by_status: DeploymentStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect(),
        }
    }

    pub fn record(&mut self, status: DeploymentStatus) {
        *self.by_status.entry(status.as_str().to_string()).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn count(&self, status: DeploymentStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Repository coordinates supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryRef {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub branch: String,
}

/// Request to create a deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub name: String,
    #[serde(default)]
    pub context_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub repository: RepositoryRef,
    #[serde(default)]
    pub configuration: ConfigurationRequest,
}

/// Caller-supplied configuration; absent fields take the defaults policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub environment_vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<AutoScalingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRequest {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_context: Option<String>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
}

/// Partial update; only present fields are applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeploymentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_vars: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_scaling: Option<AutoScalingConfig>,
}

impl UpdateDeploymentRequest {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none() && self.environment_vars.is_none() && self.auto_scaling.is_none()
    }
}
