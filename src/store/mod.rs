//! Deployment persistence
//!
//! `DeploymentStore` is the seam the lifecycle core persists through.
//! "Not found" on lookup is `Ok(None)`; mutations of a missing record are
//! `StoreError::NotFound`. Status changes are validated against the state
//! machine inside the store so concurrent writers cannot skip an edge.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deployment::model::{
    AutoScalingConfig, ClusterInfo, DeploymentId, DeploymentMetrics, DeploymentRecord,
    DeploymentStats, DeploymentStatus,
};

pub use memory::InMemoryStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("deployment {0} not found")]
    NotFound(DeploymentId),

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for listing deployments; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl DeploymentFilter {
    pub fn by_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn by_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn matches(&self, record: &DeploymentRecord) -> bool {
        self.user_id.as_ref().map_or(true, |u| *u == record.user_id)
            && self.node_id.as_ref().map_or(true, |n| *n == record.node_id)
            && self.status.map_or(true, |s| s == record.status)
            && self.namespace.as_ref().map_or(true, |ns| *ns == record.namespace)
    }
}

/// Field-level changes; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub replicas: Option<i32>,
    pub environment_vars: Option<std::collections::BTreeMap<String, String>>,
    pub auto_scaling: Option<AutoScalingConfig>,
    pub cluster_info: Option<ClusterInfo>,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentPatch {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_none()
            && self.environment_vars.is_none()
            && self.auto_scaling.is_none()
            && self.cluster_info.is_none()
            && self.deployed_at.is_none()
    }

    /// Apply to a record in place
    pub fn apply(self, record: &mut DeploymentRecord) {
        if let Some(replicas) = self.replicas {
            record.configuration.replicas = replicas;
            record.metrics.desired_pods = replicas;
        }
        if let Some(env) = self.environment_vars {
            record.configuration.environment_vars = env;
        }
        if let Some(policy) = self.auto_scaling {
            record.configuration.auto_scaling = Some(policy);
        }
        if let Some(info) = self.cluster_info {
            record.cluster_info = info;
        }
        if let Some(at) = self.deployed_at {
            record.deployed_at = Some(at);
        }
    }
}

/// Persistence operations for deployment records
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new record; the store assigns id and timestamps
    async fn create(&self, record: DeploymentRecord) -> StoreResult<DeploymentRecord>;

    async fn get(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>>;

    /// Matching records, most recently created first
    async fn list(&self, filter: &DeploymentFilter) -> StoreResult<Vec<DeploymentRecord>>;

    async fn update(&self, id: &DeploymentId, patch: DeploymentPatch) -> StoreResult<DeploymentRecord>;

    /// Move to `status` if the state machine allows it; returns the previous status.
    ///
    /// `last_error` replaces the stored error; Running always clears it.
    async fn transition(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        last_error: Option<String>,
    ) -> StoreResult<DeploymentStatus>;

    /// Overwrite metrics and stamp the health check time
    async fn update_metrics(&self, id: &DeploymentId, metrics: DeploymentMetrics) -> StoreResult<()>;

    async fn delete(&self, id: &DeploymentId) -> StoreResult<()>;

    /// Counts per status, optionally restricted to one node
    async fn stats(&self, node_id: Option<&str>) -> StoreResult<DeploymentStats> {
        let filter = DeploymentFilter {
            node_id: node_id.map(str::to_string),
            ..DeploymentFilter::default()
        };
        let mut stats = DeploymentStats::zeroed();
        for record in self.list(&filter).await? {
            stats.record(record.status);
        }
        Ok(stats)
    }
}
