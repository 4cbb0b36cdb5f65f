//! Resource provisioning
//!
//! Creates the objects owned by a deployment in a fixed order:
//! - namespace (only if missing; never removed)
//! - config map `<name>-config` (only with environment variables)
//! - workload `<name>`
//! - service `<name>-service`
//! - ingress `<name>-ingress` (only with a context path)
//!
//! Every completed step records a compensation. When a later step fails, or
//! the attempt is cancelled between steps, the compensations run in reverse
//! (unless rollback is disabled) and the names of objects that still exist
//! are returned with the error.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manifests::{self, ManifestOptions};
use super::model::{ClusterInfo, DeploymentRecord};
use super::naming::ResourceNames;
use crate::cluster::{ClusterApi, ClusterError, ClusterResult, ResourceKind};

/// Provisioner behavior
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub manifests: ManifestOptions,
    /// Prefix of external URLs
    pub ingress_base_url: String,
    pub rollback_on_failure: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            manifests: ManifestOptions::default(),
            ingress_base_url: "http://localhost".to_string(),
            rollback_on_failure: true,
        }
    }
}

/// A provisioning attempt that did not complete
#[derive(Error, Debug)]
#[error("{step} failed: {cause}")]
pub struct ProvisionFailure {
    pub step: Step,
    pub cause: ProvisionCause,
    /// Objects that exist after compensation
    pub remaining: ClusterInfo,
}

#[derive(Error, Debug)]
pub enum ProvisionCause {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("cancelled")]
    Cancelled,
}

/// Provisioning steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Namespace,
    ConfigMap,
    Workload,
    Service,
    Ingress,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Namespace => "ensure namespace",
            Step::ConfigMap => "create config map",
            Step::Workload => "create workload",
            Step::Service => "create service",
            Step::Ingress => "create ingress",
        };
        f.write_str(name)
    }
}

/// Per-resource failures collected during teardown
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<(ResourceKind, String, ClusterError)>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|(kind, name, err)| format!("{} '{}': {}", kind, name, err))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for TeardownError {}

/// Undo action for a completed step
#[derive(Debug, Clone)]
enum Compensation {
    ConfigMap(String),
    Workload(String),
    Service(String),
    Ingress(String),
}

/// Creates and removes the cluster objects of a deployment
#[derive(Clone)]
pub struct ResourceProvisioner {
    cluster: Arc<dyn ClusterApi>,
    config: ProvisionerConfig,
}

impl ResourceProvisioner {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: ProvisionerConfig) -> Self {
        Self { cluster, config }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Create every object for `record`; returns the resulting cluster info
    pub async fn provision(
        &self,
        record: &DeploymentRecord,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, ProvisionFailure> {
        let names = record.resource_names();
        let ns = record.namespace.as_str();
        let opts = &self.config.manifests;
        let mut info = ClusterInfo::default();
        let mut undo: Vec<Compensation> = Vec::new();

        macro_rules! step {
            ($step:expr, $call:expr) => {{
                if cancel.is_cancelled() {
                    return Err(self
                        .fail($step, ProvisionCause::Cancelled, ns, info, undo)
                        .await);
                }
                if let Err(e) = $call.await {
                    return Err(self
                        .fail($step, ProvisionCause::Cluster(e), ns, info, undo)
                        .await);
                }
            }};
        }

        step!(Step::Namespace, self.ensure_namespace(ns));

        if !record.configuration.environment_vars.is_empty() {
            let cm = manifests::config_map(record, &names, opts);
            step!(Step::ConfigMap, self.cluster.create_config_map(ns, &cm));
            info.config_map_name = names.config_map.clone();
            undo.push(Compensation::ConfigMap(names.config_map.clone()));
        }

        let workload = manifests::workload(record, &names, opts);
        step!(Step::Workload, self.cluster.create_workload(ns, &workload));
        info.workload_name = names.workload.clone();
        info.pod_selector = names.selector();
        undo.push(Compensation::Workload(names.workload.clone()));

        let service = manifests::service(record, &names, opts);
        step!(Step::Service, self.cluster.create_service(ns, &service));
        info.service_name = names.service.clone();
        info.internal_url = names.internal_url(ns, record.configuration.service_port);
        undo.push(Compensation::Service(names.service.clone()));

        if !record.context_path.is_empty() {
            let ingress = manifests::ingress(record, &names, opts);
            step!(Step::Ingress, self.cluster.create_ingress(ns, &ingress));
            info.ingress_name = names.ingress.clone();
            info.external_url = format!(
                "{}{}",
                self.config.ingress_base_url.trim_end_matches('/'),
                record.context_path
            );
        }

        info!(
            "Provisioned {} in namespace {} ({})",
            names.workload, ns, info.internal_url
        );
        Ok(info)
    }

    async fn ensure_namespace(&self, ns: &str) -> ClusterResult<()> {
        if self.cluster.namespace_exists(ns).await? {
            return Ok(());
        }
        let namespace = manifests::namespace(ns, &self.config.manifests);
        match self.cluster.create_namespace(&namespace).await {
            Ok(()) => {
                info!("Created namespace {}", ns);
                Ok(())
            }
            // lost a race with another deployment
            Err(ClusterError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run compensations in reverse and build the failure
    async fn fail(
        &self,
        step: Step,
        cause: ProvisionCause,
        ns: &str,
        mut remaining: ClusterInfo,
        undo: Vec<Compensation>,
    ) -> ProvisionFailure {
        warn!("Provisioning step '{}' failed in {}: {}", step, ns, cause);

        if !self.config.rollback_on_failure {
            return ProvisionFailure {
                step,
                cause,
                remaining,
            };
        }

        for action in undo.into_iter().rev() {
            let result = match &action {
                Compensation::Ingress(name) => self.cluster.delete_ingress(ns, name).await,
                Compensation::Service(name) => self.cluster.delete_service(ns, name).await,
                Compensation::Workload(name) => self.cluster.delete_workload(ns, name).await,
                Compensation::ConfigMap(name) => self.cluster.delete_config_map(ns, name).await,
            };

            match result {
                Ok(()) => {
                    debug!("Rolled back {:?}", action);
                    clear(&mut remaining, &action);
                }
                Err(e) if e.is_not_found() => clear(&mut remaining, &action),
                Err(e) => warn!("Rollback of {:?} failed: {}", action, e),
            }
        }

        ProvisionFailure {
            step,
            cause,
            remaining,
        }
    }

    /// Delete every object of a deployment; missing objects are not errors.
    ///
    /// All four deletions are attempted even when one fails.
    pub async fn teardown(&self, namespace: &str, canonical: &str) -> Result<(), TeardownError> {
        let names = ResourceNames::for_canonical(canonical);
        let mut failures = Vec::new();

        let results = [
            (
                ResourceKind::Ingress,
                &names.ingress,
                self.cluster.delete_ingress(namespace, &names.ingress).await,
            ),
            (
                ResourceKind::Service,
                &names.service,
                self.cluster.delete_service(namespace, &names.service).await,
            ),
            (
                ResourceKind::Workload,
                &names.workload,
                self.cluster.delete_workload(namespace, &names.workload).await,
            ),
            (
                ResourceKind::ConfigMap,
                &names.config_map,
                self.cluster
                    .delete_config_map(namespace, &names.config_map)
                    .await,
            ),
        ];

        for (kind, name, result) in results {
            match result {
                Ok(()) => debug!("Deleted {} {}/{}", kind, namespace, name),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("Failed to delete {} {}/{}: {}", kind, namespace, name, e);
                    failures.push((kind, name.clone(), e));
                }
            }
        }

        if failures.is_empty() {
            info!("Tore down {} in namespace {}", canonical, namespace);
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    /// Overwrite the live replica count
    pub async fn rescale(&self, namespace: &str, canonical: &str, replicas: i32) -> ClusterResult<()> {
        let mut live = self.cluster.get_workload(namespace, canonical).await?;
        manifests::set_replicas(&mut live, replicas);
        self.cluster.replace_workload(namespace, &live).await?;
        info!("Scaled {}/{} to {} replicas", namespace, canonical, replicas);
        Ok(())
    }

    /// Force a rolling restart by stamping the pod template
    pub async fn trigger_restart(&self, namespace: &str, canonical: &str) -> ClusterResult<()> {
        let mut live = self.cluster.get_workload(namespace, canonical).await?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        manifests::stamp_restart(&mut live, &now);
        self.cluster.replace_workload(namespace, &live).await?;
        info!("Restarted {}/{} at {}", namespace, canonical, now);
        Ok(())
    }
}

fn clear(info: &mut ClusterInfo, action: &Compensation) {
    match action {
        Compensation::ConfigMap(_) => info.config_map_name.clear(),
        Compensation::Workload(_) => {
            info.workload_name.clear();
            info.pod_selector.clear();
        }
        Compensation::Service(_) => {
            info.service_name.clear();
            info.internal_url.clear();
        }
        Compensation::Ingress(_) => {
            info.ingress_name.clear();
            info.external_url.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::Verb;
    use crate::cluster::InMemoryCluster;
    use crate::deployment::manifests::RESTARTED_AT_ANNOTATION;
    use crate::deployment::testing::sample_record;

    fn provisioner(cluster: &Arc<InMemoryCluster>, rollback: bool) -> ResourceProvisioner {
        ResourceProvisioner::new(
            cluster.clone(),
            ProvisionerConfig {
                rollback_on_failure: rollback,
                ..ProvisionerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_provision_creates_everything() {
        let cluster = Arc::new(InMemoryCluster::new());
        let mut record = sample_record("web");
        record.configuration.environment_vars.insert("A".into(), "1".into());

        let info = provisioner(&cluster, true)
            .provision(&record, &CancellationToken::new())
            .await
            .unwrap();

        assert!(cluster.has_namespace("apps"));
        assert_eq!(info.workload_name, "web");
        assert_eq!(info.config_map_name, "web-config");
        assert_eq!(info.service_name, "web-service");
        assert_eq!(info.ingress_name, "web-ingress");
        assert_eq!(info.external_url, "http://localhost/web");
        assert_eq!(info.internal_url, "http://web-service.apps.svc.cluster.local:80");
        assert_eq!(info.pod_selector, "app=web");
        assert_eq!(cluster.object_count(), 4);
        assert_eq!(
            cluster.calls(),
            vec![
                "create namespace apps",
                "create config map web-config",
                "create workload web",
                "create service web-service",
                "create ingress web-ingress",
            ]
        );
    }

    #[tokio::test]
    async fn test_optional_steps_skipped() {
        let cluster = Arc::new(InMemoryCluster::new());
        let mut record = sample_record("web");
        record.context_path = String::new();

        let info = provisioner(&cluster, true)
            .provision(&record, &CancellationToken::new())
            .await
            .unwrap();

        assert!(info.config_map_name.is_empty());
        assert!(info.ingress_name.is_empty());
        assert!(info.external_url.is_empty());
        assert_eq!(cluster.object_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_completed_steps() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail(ResourceKind::Service, Verb::Create, "quota exceeded");
        let record = sample_record("web");

        let failure = provisioner(&cluster, true)
            .provision(&record, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.step, Step::Service);
        assert!(failure.to_string().contains("quota exceeded"));
        assert!(failure.remaining.is_empty());
        assert!(cluster.workload("apps", "web").is_none());
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_without_rollback_reports_orphans() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail(ResourceKind::Service, Verb::Create, "quota exceeded");
        let record = sample_record("web");

        let failure = provisioner(&cluster, false)
            .provision(&record, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.remaining.workload_name, "web");
        assert!(failure.remaining.service_name.is_empty());
        assert!(cluster.workload("apps", "web").is_some());
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_name() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.fail(ResourceKind::Ingress, Verb::Create, "admission denied");
        cluster.fail(ResourceKind::Workload, Verb::Delete, "api timeout");
        let record = sample_record("web");

        let failure = provisioner(&cluster, true)
            .provision(&record, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.step, Step::Ingress);
        assert_eq!(failure.remaining.workload_name, "web");
        assert!(failure.remaining.service_name.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cluster = Arc::new(InMemoryCluster::new());
        let token = CancellationToken::new();
        token.cancel();

        let failure = provisioner(&cluster, true)
            .provision(&sample_record("web"), &token)
            .await
            .unwrap_err();

        assert!(matches!(failure.cause, ProvisionCause::Cancelled));
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let cluster = Arc::new(InMemoryCluster::new());
        let p = provisioner(&cluster, true);
        p.provision(&sample_record("web"), &CancellationToken::new())
            .await
            .unwrap();

        p.teardown("apps", "web").await.unwrap();
        assert_eq!(cluster.object_count(), 0);
        p.teardown("apps", "web").await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_order_and_partial_failure() {
        let cluster = Arc::new(InMemoryCluster::new());
        let p = provisioner(&cluster, true);
        p.provision(&sample_record("web"), &CancellationToken::new())
            .await
            .unwrap();
        cluster.fail(ResourceKind::Service, Verb::Delete, "forbidden");

        let err = p.teardown("apps", "web").await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, ResourceKind::Service);
        // the remaining deletions still ran
        assert!(cluster.workload("apps", "web").is_none());
        assert!(cluster.ingress("apps", "web-ingress").is_none());

        let deletes: Vec<String> = cluster
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "delete ingress web-ingress",
                "delete workload web",
                "delete config map web-config",
            ]
        );
    }

    #[tokio::test]
    async fn test_rescale_and_restart() {
        let cluster = Arc::new(InMemoryCluster::new());
        let p = provisioner(&cluster, true);
        p.provision(&sample_record("web"), &CancellationToken::new())
            .await
            .unwrap();

        p.rescale("apps", "web", 5).await.unwrap();
        p.trigger_restart("apps", "web").await.unwrap();

        let live = cluster.workload("apps", "web").unwrap().spec.unwrap();
        assert_eq!(live.replicas, Some(5));
        let annotations = live.template.metadata.unwrap().annotations.unwrap();
        assert!(annotations.contains_key(RESTARTED_AT_ANNOTATION));
    }

    #[tokio::test]
    async fn test_rescale_missing_workload() {
        let cluster = Arc::new(InMemoryCluster::new());
        let err = provisioner(&cluster, true)
            .rescale("apps", "ghost", 3)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
