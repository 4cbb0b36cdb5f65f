//! Cluster access for nodedeployer
//!
//! This module provides:
//! - `ClusterApi`: the seam between the lifecycle core and the orchestration API
//! - `KubeCluster`: the Kubernetes implementation backed by `kube`
//! - `InMemoryCluster`: an in-process cluster used for local runs and tests
//! - Inspection helpers (pods, nodes, events, cluster summary)
//! - Resource quantity parsing

pub mod inspect;
pub mod kubernetes;
pub mod memory;
pub mod quantity;
pub mod resources;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use inspect::{ClusterSummary, EventSummary, NodeSummary, PodSummary, ServiceSummary};
pub use kubernetes::KubeCluster;
pub use memory::InMemoryCluster;
pub use resources::{OperationStatus, ResourceList};

/// Kinds of cluster objects the orchestrator touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Workload,
    Service,
    Ingress,
    Pod,
    Node,
    Event,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::ConfigMap => "config map",
            ResourceKind::Workload => "workload",
            ResourceKind::Service => "service",
            ResourceKind::Ingress => "ingress",
            ResourceKind::Pod => "pod",
            ResourceKind::Node => "node",
            ResourceKind::Event => "event",
        };
        f.write_str(name)
    }
}

/// Errors returned by the orchestration API
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("cluster API error on {kind}: {message}")]
    Api { kind: ResourceKind, message: String },

    #[error("cluster connection failed: {0}")]
    Connection(String),

    #[error("metrics API is not available")]
    MetricsUnavailable,
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn api(kind: ResourceKind, message: impl Into<String>) -> Self {
        ClusterError::Api {
            kind,
            message: message.into(),
        }
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Version information reported by the API server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
    pub git_version: String,
    pub platform: String,
}

/// Live resource usage of one pod, from the metrics add-on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodUsage {
    pub name: String,
    pub cpu_millicores: u64,
    pub memory_bytes: u64,
}

/// Operations the lifecycle core needs from the orchestration API.
///
/// Deletes of workloads and ingresses use foreground propagation so dependent
/// objects are gone before the call returns.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    // Namespaces
    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool>;
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()>;
    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>>;

    // Config objects
    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap)
        -> ClusterResult<()>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    // Workloads
    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()>;
    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Deployment>;
    async fn replace_workload(&self, namespace: &str, workload: &Deployment)
        -> ClusterResult<()>;
    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    // Network exposure
    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()>;
    async fn list_services(&self, namespace: &str) -> ClusterResult<Vec<Service>>;

    // Routing
    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<()>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    // Observation
    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>>;
    async fn list_all_pods(&self) -> ClusterResult<Vec<Pod>>;
    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64)
        -> ClusterResult<String>;
    async fn list_nodes(&self) -> ClusterResult<Vec<Node>>;
    async fn list_events(&self, namespace: &str) -> ClusterResult<Vec<Event>>;
    async fn server_version(&self) -> ClusterResult<ServerVersion>;

    /// Per-pod usage; `MetricsUnavailable` when the add-on is not installed
    async fn pod_usage(&self, namespace: &str) -> ClusterResult<Vec<PodUsage>>;
}

/// Name of an object, empty if unset
pub fn object_name(metadata: &ObjectMeta) -> String {
    metadata.name.clone().unwrap_or_default()
}
