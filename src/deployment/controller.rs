//! Lifecycle controller
//!
//! Drives a deployment through the status machine:
//!
//! ```text
//! Pending -> Building -> Deploying -> Running <-> Updating
//!    \          \            \
//!     +----------+------------+--> Failed --(retry)--> Pending
//! any --(delete)--> Stopped
//! ```
//!
//! `create` validates and persists a Pending record, then hands the rest of
//! the work to a supervised background task. Every command on an id, and the
//! provisioning phase of its creation task, runs under that id's lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{DeploymentError, DeploymentResult};
use super::locks::KeyedLocks;
use super::model::{
    ClusterInfo, CreateDeploymentRequest, DeploymentId, DeploymentMetrics, DeploymentRecord,
    DeploymentStats, DeploymentStatus, SourceSnapshot, UpdateDeploymentRequest,
};
use super::naming::derive_name;
use super::provisioner::{ProvisionCause, ResourceProvisioner};
use super::supervisor::{TaskControl, TaskSupervisor};
use crate::cluster::quantity::is_valid_quantity;
use crate::config::{validate_config, DeploymentDefaults};
use crate::source::{Branch, RepositoryInfo, SourceControl};
use crate::store::{DeploymentFilter, DeploymentPatch, DeploymentStore};

/// `last_error` written when a creation task is cancelled
pub const CANCELLED: &str = "cancelled";

const DEFAULT_BUILD_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// SBIO: Pure validation (no I/O)
// ============================================================================

/// Check a create request before any external call
pub fn validate_create(
    user_id: &str,
    request: &CreateDeploymentRequest,
    source_token: &str,
) -> Result<(), String> {
    if user_id.trim().is_empty() {
        return Err("user id is required".to_string());
    }
    if request.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    if derive_name(&request.name).is_empty() {
        return Err(format!(
            "name '{}' has no characters usable in a resource name",
            request.name
        ));
    }
    if request.context_path.trim().is_empty() {
        return Err("context path is required".to_string());
    }
    if !request.context_path.starts_with('/') {
        return Err("context path must start with '/'".to_string());
    }
    if request.repository.owner.trim().is_empty() || request.repository.name.trim().is_empty() {
        return Err("GitHub repository owner and name are required".to_string());
    }
    if request.repository.branch.trim().is_empty() {
        return Err("GitHub branch is required".to_string());
    }
    if source_token.trim().is_empty() {
        return Err("source token is required".to_string());
    }
    if let Some(ns) = &request.namespace {
        if !ns.is_empty() && derive_name(ns) != *ns {
            return Err(format!("namespace '{}' is not a valid resource name", ns));
        }
    }

    let config = &request.configuration;
    if let Some(replicas) = config.replicas {
        validate_replicas(replicas)?;
    }
    for (label, port) in [
        ("container port", config.container_port),
        ("service port", config.service_port),
    ] {
        if let Some(port) = port {
            if !(1..=65535).contains(&port) {
                return Err(format!("{} must be between 1 and 65535, got {}", label, port));
            }
        }
    }
    for (label, value) in [
        ("memory request", &config.memory_request),
        ("memory limit", &config.memory_limit),
        ("cpu request", &config.cpu_request),
        ("cpu limit", &config.cpu_limit),
    ] {
        match value {
            Some(v) if !v.trim().is_empty() && !is_valid_quantity(v) => {
                return Err(format!("{} '{}' is not a valid quantity", label, v));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_replicas(replicas: i32) -> Result<(), String> {
    if replicas < 0 {
        return Err(format!("replicas must not be negative, got {}", replicas));
    }
    Ok(())
}

// ============================================================================
// SBIO: Controller (store, source and cluster behind traits)
// ============================================================================

/// Entry point for every lifecycle command
#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn DeploymentStore>,
    source: Arc<dyn SourceControl>,
    provisioner: ResourceProvisioner,
    defaults: DeploymentDefaults,
    default_namespace: String,
    build_delay: Duration,
    locks: KeyedLocks,
    /// `<namespace>/<canonical>` claims held while a new record is stored
    names: KeyedLocks<String>,
    tasks: TaskSupervisor,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        source: Arc<dyn SourceControl>,
        provisioner: ResourceProvisioner,
    ) -> Self {
        Self {
            store,
            source,
            provisioner,
            defaults: DeploymentDefaults::default(),
            default_namespace: "nodedeployer-apps".to_string(),
            build_delay: DEFAULT_BUILD_DELAY,
            locks: KeyedLocks::new(),
            names: KeyedLocks::new(),
            tasks: TaskSupervisor::new(),
        }
    }

    pub fn with_defaults(mut self, defaults: DeploymentDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Placeholder for the image build step
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Validate, persist a Pending record and launch its creation task
    pub async fn create(
        &self,
        user_id: &str,
        node_id: &str,
        request: CreateDeploymentRequest,
        source_token: &str,
    ) -> DeploymentResult<DeploymentRecord> {
        validate_create(user_id, &request, source_token).map_err(DeploymentError::Validation)?;
        self.defaults
            .validate_request(&request.configuration)
            .map_err(DeploymentError::Validation)?;

        let repo_ref = &request.repository;
        let repo = self
            .source
            .repository(source_token, &repo_ref.owner, &repo_ref.name)
            .await
            .map_err(|e| DeploymentError::provider("fetch repository", e))?;

        let recipe = self
            .source
            .find_build_recipe(source_token, &repo_ref.owner, &repo_ref.name, &repo_ref.branch)
            .await
            .map_err(|e| DeploymentError::provider("check build recipe", e))?
            .ok_or_else(|| {
                DeploymentError::Conflict(format!(
                    "repository {} must contain a Dockerfile on branch '{}'",
                    repo.full_name, repo_ref.branch
                ))
            })?;

        let namespace = request
            .namespace
            .as_deref()
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or(self.default_namespace.as_str())
            .to_string();
        let canonical = derive_name(&request.name);
        let configuration = self
            .defaults
            .resolve(&request.configuration, &repo, &recipe);

        let now = Utc::now();
        let record = DeploymentRecord {
            id: Uuid::nil(),
            user_id: user_id.to_string(),
            node_id: node_id.to_string(),
            name: request.name.trim().to_string(),
            context_path: request.context_path.clone(),
            namespace,
            status: DeploymentStatus::Pending,
            last_error: None,
            source: SourceSnapshot {
                owner: repo.owner.clone(),
                name: repo.name.clone(),
                full_name: repo.full_name.clone(),
                branch: repo_ref.branch.clone(),
                clone_url: repo.clone_url.clone(),
                private: repo.private,
                language: repo.language.clone(),
                description: repo.description.clone(),
            },
            metrics: DeploymentMetrics {
                desired_pods: configuration.replicas,
                ..DeploymentMetrics::default()
            },
            configuration,
            cluster_info: ClusterInfo::default(),
            created_at: now,
            updated_at: now,
            deployed_at: None,
            last_health_check_at: None,
        };

        // The name check and the insert must not interleave with another
        // create of the same name, or both records would own one set of objects
        let claim = format!("{}/{}", record.namespace, canonical);
        let guard = self.names.acquire(claim.clone()).await;
        let created = self.insert_unique(record, &canonical).await;
        drop(guard);
        self.names.forget(&claim);
        let record = created?;

        info!(
            "Accepted deployment {} ({}) from {} into {}",
            record.id, canonical, repo.full_name, record.namespace
        );
        self.launch(record.id);
        Ok(record)
    }

    /// Store `record` unless its name is taken in its namespace.
    ///
    /// Callers hold the name claim.
    async fn insert_unique(
        &self,
        record: DeploymentRecord,
        canonical: &str,
    ) -> DeploymentResult<DeploymentRecord> {
        let same_namespace = DeploymentFilter::default().in_namespace(record.namespace.clone());
        if self
            .store
            .list(&same_namespace)
            .await?
            .iter()
            .any(|existing| existing.canonical_name() == canonical)
        {
            return Err(DeploymentError::Conflict(format!(
                "a deployment named '{}' already exists in namespace {}",
                canonical, record.namespace
            )));
        }
        Ok(self.store.create(record).await?)
    }

    fn launch(&self, id: DeploymentId) {
        let this = self.clone();
        let attempt = self.tasks.launch(id, move |control| async move {
            this.run_creation(id, control).await;
        });
        debug!("Launched creation task for {} (attempt {})", id, attempt);
    }

    async fn run_creation(&self, id: DeploymentId, control: TaskControl) {
        if let Err(e) = self.drive_creation(id, &control).await {
            error!("Creation task for {} stopped: {}", id, e);
        }
    }

    async fn drive_creation(&self, id: DeploymentId, control: &TaskControl) -> DeploymentResult<()> {
        self.store
            .transition(&id, DeploymentStatus::Building, None)
            .await?;

        tokio::select! {
            _ = control.cancelled() => {
                info!("Deployment {} cancelled while building", id);
                self.store
                    .transition(&id, DeploymentStatus::Failed, Some(CANCELLED.to_string()))
                    .await?;
                return Ok(());
            }
            _ = tokio::time::sleep(self.build_delay) => {}
        }

        let _guard = self.locks.acquire(id).await;

        // Re-read: an update may have changed the configuration while building
        let record = self.require(&id).await?;
        self.store
            .transition(&id, DeploymentStatus::Deploying, None)
            .await?;

        match self.provisioner.provision(&record, control.token()).await {
            // cancel accepted while the last step was in progress
            Ok(cluster_info) if !control.commit() => {
                let remaining = if self.provisioner.config().rollback_on_failure {
                    match self
                        .provisioner
                        .teardown(&record.namespace, &record.canonical_name())
                        .await
                    {
                        Ok(()) => ClusterInfo::default(),
                        Err(e) => {
                            warn!("Rollback of cancelled deployment {} failed: {}", id, e);
                            cluster_info
                        }
                    }
                } else {
                    cluster_info
                };
                let patch = DeploymentPatch {
                    cluster_info: Some(remaining),
                    ..DeploymentPatch::default()
                };
                self.store.update(&id, patch).await?;
                self.store
                    .transition(&id, DeploymentStatus::Failed, Some(CANCELLED.to_string()))
                    .await?;
                info!("Deployment {} cancelled after provisioning", id);
            }
            Ok(cluster_info) => {
                let patch = DeploymentPatch {
                    cluster_info: Some(cluster_info),
                    deployed_at: Some(Utc::now()),
                    ..DeploymentPatch::default()
                };
                self.store.update(&id, patch).await?;
                self.store
                    .transition(&id, DeploymentStatus::Running, None)
                    .await?;
                info!("Deployment {} is running", id);
            }
            Err(failure) => {
                let message = match failure.cause {
                    ProvisionCause::Cancelled => CANCELLED.to_string(),
                    ProvisionCause::Cluster(_) => failure.to_string(),
                };
                let patch = DeploymentPatch {
                    cluster_info: Some(failure.remaining),
                    ..DeploymentPatch::default()
                };
                self.store.update(&id, patch).await?;
                self.store
                    .transition(&id, DeploymentStatus::Failed, Some(message.clone()))
                    .await?;
                warn!("Deployment {} failed: {}", id, message);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Apply the provided fields; a changed replica count reaches the live
    /// workload before the store is touched.
    pub async fn update(
        &self,
        id: &DeploymentId,
        request: UpdateDeploymentRequest,
    ) -> DeploymentResult<DeploymentRecord> {
        let _guard = self.locks.acquire(*id).await;
        let record = self.require(id).await?;
        if request.is_empty() {
            return Ok(record);
        }

        let mut candidate = record.configuration.clone();
        if let Some(replicas) = request.replicas {
            validate_replicas(replicas).map_err(DeploymentError::Validation)?;
            candidate.replicas = replicas;
        }
        if let Some(policy) = &request.auto_scaling {
            candidate.auto_scaling = Some(policy.clone());
        }
        validate_config(&candidate).map_err(DeploymentError::Validation)?;

        if let Some(replicas) = request.replicas {
            if replicas != record.configuration.replicas && has_workload(&record) {
                self.provisioner
                    .rescale(&record.namespace, &record.canonical_name(), replicas)
                    .await
                    .map_err(|e| DeploymentError::cluster("update replicas", e))?;
            }
        }

        let patch = DeploymentPatch {
            replicas: request.replicas,
            environment_vars: request.environment_vars,
            auto_scaling: request.auto_scaling,
            ..DeploymentPatch::default()
        };
        let updated = self.store.update(id, patch).await?;
        info!("Updated deployment {}", id);
        Ok(updated)
    }

    /// Cancel any creation task, tear down, then remove the record.
    ///
    /// A teardown failure aborts the delete and keeps the record.
    pub async fn delete(&self, id: &DeploymentId) -> DeploymentResult<()> {
        self.require(id).await?;
        self.tasks.cancel_and_wait(id).await;

        let guard = self.locks.acquire(*id).await;
        let record = self.require(id).await?;
        self.provisioner
            .teardown(&record.namespace, &record.canonical_name())
            .await?;

        self.store
            .transition(id, DeploymentStatus::Stopped, None)
            .await?;
        self.store.delete(id).await?;
        drop(guard);
        self.locks.forget(id);

        info!("Deleted deployment {} ({})", id, record.canonical_name());
        Ok(())
    }

    /// Rolling restart of the live workload; status is unchanged
    pub async fn restart(&self, id: &DeploymentId) -> DeploymentResult<DeploymentRecord> {
        let _guard = self.locks.acquire(*id).await;
        let record = self.require(id).await?;
        self.provisioner
            .trigger_restart(&record.namespace, &record.canonical_name())
            .await
            .map_err(|e| DeploymentError::cluster("restart", e))?;
        Ok(record)
    }

    /// Set the replica count on the live workload, then in the store
    pub async fn scale(
        &self,
        id: &DeploymentId,
        replicas: i32,
    ) -> DeploymentResult<DeploymentRecord> {
        validate_replicas(replicas).map_err(DeploymentError::Validation)?;

        let _guard = self.locks.acquire(*id).await;
        let record = self.require(id).await?;
        if has_workload(&record) || !record.status.is_in_flight() {
            self.provisioner
                .rescale(&record.namespace, &record.canonical_name(), replicas)
                .await
                .map_err(|e| DeploymentError::cluster("scale", e))?;
        }

        let patch = DeploymentPatch {
            replicas: Some(replicas),
            ..DeploymentPatch::default()
        };
        let updated = self.store.update(id, patch).await?;
        info!("Scaled deployment {} to {} replicas", id, replicas);
        Ok(updated)
    }

    /// Start a new creation attempt for a Failed deployment.
    ///
    /// Objects left behind by the failed attempt are removed first.
    pub async fn retry(&self, id: &DeploymentId) -> DeploymentResult<DeploymentRecord> {
        let guard = self.locks.acquire(*id).await;
        let record = self.require(id).await?;
        if record.status != DeploymentStatus::Failed {
            return Err(DeploymentError::InvalidState {
                id: *id,
                status: record.status,
                action: "retry",
            });
        }

        if !record.cluster_info.is_empty() {
            self.provisioner
                .teardown(&record.namespace, &record.canonical_name())
                .await?;
            let patch = DeploymentPatch {
                cluster_info: Some(ClusterInfo::default()),
                ..DeploymentPatch::default()
            };
            self.store.update(id, patch).await?;
        }

        self.store
            .transition(id, DeploymentStatus::Pending, None)
            .await?;
        drop(guard);

        self.launch(*id);
        info!("Retrying deployment {}", id);
        self.require(id).await
    }

    /// Ask the in-flight creation task to stop; it rolls back and fails.
    ///
    /// Refused once the task has committed to Running.
    pub async fn cancel(&self, id: &DeploymentId) -> DeploymentResult<DeploymentRecord> {
        let record = self.require(id).await?;
        if !record.status.is_in_flight() || !self.tasks.cancel(id) {
            return Err(DeploymentError::InvalidState {
                id: *id,
                status: record.status,
                action: "cancel",
            });
        }
        info!("Cancellation requested for deployment {}", id);
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Repository metadata as seen with the caller's token
    pub async fn repository(
        &self,
        source_token: &str,
        owner: &str,
        repo: &str,
    ) -> DeploymentResult<RepositoryInfo> {
        self.source
            .repository(source_token, owner, repo)
            .await
            .map_err(|e| DeploymentError::provider("fetch repository", e))
    }

    pub async fn branches(
        &self,
        source_token: &str,
        owner: &str,
        repo: &str,
    ) -> DeploymentResult<Vec<Branch>> {
        self.source
            .branches(source_token, owner, repo)
            .await
            .map_err(|e| DeploymentError::provider("list branches", e))
    }

    pub async fn get(&self, id: &DeploymentId) -> DeploymentResult<DeploymentRecord> {
        self.require(id).await
    }

    pub async fn list_by_user(&self, user_id: &str) -> DeploymentResult<Vec<DeploymentRecord>> {
        Ok(self.store.list(&DeploymentFilter::by_user(user_id)).await?)
    }

    pub async fn list_by_node(&self, node_id: &str) -> DeploymentResult<Vec<DeploymentRecord>> {
        Ok(self.store.list(&DeploymentFilter::by_node(node_id)).await?)
    }

    pub async fn list(&self, filter: &DeploymentFilter) -> DeploymentResult<Vec<DeploymentRecord>> {
        Ok(self.store.list(filter).await?)
    }

    pub async fn stats(&self, node_id: Option<&str>) -> DeploymentResult<DeploymentStats> {
        Ok(self.store.stats(node_id).await?)
    }

    /// True while a creation task exists for `id`
    pub fn is_task_running(&self, id: &DeploymentId) -> bool {
        self.tasks.is_running(id)
    }

    /// Wait for the current creation task of `id` to finish
    pub async fn wait_for_task(&self, id: &DeploymentId) {
        self.tasks.wait(id).await;
    }

    /// Cancel all creation tasks
    pub fn shutdown(&self) {
        self.tasks.cancel_all();
    }

    async fn require(&self, id: &DeploymentId) -> DeploymentResult<DeploymentRecord> {
        self.store
            .get(id)
            .await?
            .ok_or(DeploymentError::NotFound(*id))
    }
}

fn has_workload(record: &DeploymentRecord) -> bool {
    !record.cluster_info.workload_name.is_empty()
}
