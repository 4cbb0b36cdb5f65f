//! Reconciliation of observed cluster state into deployment records
//!
//! Pull based: nothing here schedules itself. The scheduler module (or an
//! API call) decides when to run it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{DeploymentError, DeploymentResult};
use super::model::{DeploymentId, DeploymentMetrics, DeploymentRecord, DeploymentStatus};
use super::naming::APP_LABEL;
use crate::cluster::inspect::{pod_phase, restart_count};
use crate::cluster::{object_name, ClusterApi, ClusterError, PodUsage};
use crate::store::{DeploymentFilter, DeploymentStore};

// ============================================================================
// SBIO: Pure metrics computation
// ============================================================================

/// Metrics for `record` from the pods and usage samples of its namespace.
///
/// Active pods are those named `<canonical>-...` whose `app` label, when
/// present, is the canonical name; ready pods are active pods in phase
/// Running. Desired comes from the stored configuration.
pub fn compute_metrics(
    record: &DeploymentRecord,
    pods: &[Pod],
    usage: &[PodUsage],
    now: DateTime<Utc>,
) -> DeploymentMetrics {
    let canonical = record.canonical_name();
    let prefix = record.resource_names().pod_prefix();
    let (active, foreign): (Vec<&Pod>, Vec<&Pod>) = pods
        .iter()
        .filter(|pod| object_name(&pod.metadata).starts_with(&prefix))
        .partition(|pod| app_label_matches(pod, &canonical));
    // `web` must not pick up the pods (or usage) of a sibling like `web-api`
    let foreign: HashSet<String> = foreign
        .iter()
        .map(|pod| object_name(&pod.metadata))
        .collect();

    let ready = active
        .iter()
        .filter(|pod| pod_phase(pod) == "Running")
        .count();
    let restarts = active.iter().map(|pod| restart_count(pod)).sum();

    let (cpu, memory) = usage
        .iter()
        .filter(|sample| sample.name.starts_with(&prefix) && !foreign.contains(&sample.name))
        .fold((0u64, 0u64), |(cpu, mem), sample| {
            (cpu + sample.cpu_millicores, mem + sample.memory_bytes)
        });

    let uptime_seconds = record
        .deployed_at
        .map(|at| (now - at).num_seconds().max(0))
        .unwrap_or(0);

    DeploymentMetrics {
        active_pods: active.len() as i32,
        desired_pods: record.configuration.replicas,
        ready_pods: ready as i32,
        cpu_usage: cpu,
        memory_usage: memory,
        uptime_seconds,
        restart_count: restarts,
        ..DeploymentMetrics::default()
    }
}

fn app_label_matches(pod: &Pod, canonical: &str) -> bool {
    match pod.metadata.labels.as_ref().and_then(|l| l.get(APP_LABEL)) {
        Some(app) => app == canonical,
        None => true,
    }
}

/// Outcome of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub reconciled: usize,
    pub failed: usize,
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over compute_metrics
// ============================================================================

#[derive(Clone)]
pub struct ReconciliationReporter {
    store: Arc<dyn DeploymentStore>,
    cluster: Arc<dyn ClusterApi>,
}

impl ReconciliationReporter {
    pub fn new(store: Arc<dyn DeploymentStore>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self { store, cluster }
    }

    /// Recompute and persist the metrics of one record
    pub async fn reconcile(&self, record: &DeploymentRecord) -> DeploymentResult<DeploymentMetrics> {
        let pods = self
            .cluster
            .list_pods(&record.namespace)
            .await
            .map_err(|e| DeploymentError::cluster("list pods", e))?;

        let usage = match self.cluster.pod_usage(&record.namespace).await {
            Ok(usage) => usage,
            Err(ClusterError::MetricsUnavailable) => Vec::new(),
            Err(e) => {
                warn!("Usage query for {} failed: {}", record.namespace, e);
                Vec::new()
            }
        };

        let metrics = compute_metrics(record, &pods, &usage, Utc::now());
        self.store.update_metrics(&record.id, metrics.clone()).await?;
        debug!(
            "Reconciled {}: {}/{} ready, {} desired",
            record.id, metrics.ready_pods, metrics.active_pods, metrics.desired_pods
        );
        Ok(metrics)
    }

    pub async fn reconcile_by_id(&self, id: &DeploymentId) -> DeploymentResult<DeploymentMetrics> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(DeploymentError::NotFound(*id))?;
        self.reconcile(&record).await
    }

    /// Reconcile every Running deployment; failures are counted, not returned
    pub async fn reconcile_running(&self) -> DeploymentResult<ReconcileSummary> {
        let filter = DeploymentFilter::default().with_status(DeploymentStatus::Running);
        let mut summary = ReconcileSummary::default();

        let records = self.store.list(&filter).await?;
        let results = join_all(records.iter().map(|record| self.reconcile(record))).await;

        for (record, result) in records.iter().zip(results) {
            match result {
                Ok(_) => summary.reconciled += 1,
                Err(e) => {
                    warn!("Reconciliation of {} failed: {}", record.id, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.reconciled + summary.failed > 0 {
            info!(
                "Reconciled {} running deployment(s), {} failed",
                summary.reconciled, summary.failed
            );
        }
        Ok(summary)
    }
}
