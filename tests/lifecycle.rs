//! End-to-end lifecycle tests against the in-process cluster
//!
//! These drive the controller the way the HTTP layer does and then inspect
//! both the store and the objects left in the cluster.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use nodedeployer::cluster::memory::Verb;
use nodedeployer::cluster::{InMemoryCluster, PodUsage, ResourceKind};
use nodedeployer::deployment::model::RepositoryRef;
use nodedeployer::deployment::{
    CreateDeploymentRequest, DeploymentStatus, ErrorKind, LifecycleController, ProvisionerConfig,
    ReconciliationReporter, ResourceProvisioner,
};
use nodedeployer::source::StaticSource;
use nodedeployer::store::{DeploymentStore, InMemoryStore};

struct Env {
    cluster: Arc<InMemoryCluster>,
    store: Arc<dyn DeploymentStore>,
    controller: LifecycleController,
}

fn env_with(config: ProvisionerConfig, build_delay: Duration) -> Env {
    let cluster = Arc::new(InMemoryCluster::new());
    let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryStore::new());
    let source = Arc::new(
        StaticSource::new()
            .with_repository("acme", "shop", &["main", "dev"], Some("Dockerfile"))
            .with_repository("acme", "docs", &["main"], None),
    );
    let provisioner = ResourceProvisioner::new(cluster.clone(), config);
    let controller = LifecycleController::new(store.clone(), source, provisioner)
        .with_default_namespace("team-apps")
        .with_build_delay(build_delay);
    Env {
        cluster,
        store,
        controller,
    }
}

fn env() -> Env {
    env_with(ProvisionerConfig::default(), Duration::ZERO)
}

fn shop(name: &str) -> CreateDeploymentRequest {
    CreateDeploymentRequest {
        name: name.into(),
        context_path: "/shop".into(),
        repository: RepositoryRef {
            owner: "acme".into(),
            name: "shop".into(),
            branch: "main".into(),
        },
        ..CreateDeploymentRequest::default()
    }
}

fn running_pod(name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            ..ObjectMeta::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some("Running".into()),
            ..PodStatus::default()
        }),
    }
}

#[tokio::test]
async fn test_successful_path_reaches_running() {
    let env = env();
    let created = env
        .controller
        .create("user-1", "node-1", shop("Shop Front"), "ghp_token")
        .await
        .unwrap();
    assert_eq!(created.status, DeploymentStatus::Pending);

    env.controller.wait_for_task(&created.id).await;
    let record = env.controller.get(&created.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Running);
    assert_eq!(record.cluster_info.workload_name, "shop-front");
    assert_eq!(record.cluster_info.service_name, "shop-front-service");
    assert_eq!(record.cluster_info.ingress_name, "shop-front-ingress");
    assert_eq!(record.cluster_info.external_url, "http://localhost/shop");
    assert!(env.cluster.has_namespace("team-apps"));
    assert!(env.cluster.workload("team-apps", "shop-front").is_some());
    assert!(env.cluster.ingress("team-apps", "shop-front-ingress").is_some());
}

#[tokio::test]
async fn test_missing_recipe_is_conflict_without_record() {
    let env = env();
    let mut request = shop("docs");
    request.repository.name = "docs".into();

    let err = env
        .controller
        .create("user-1", "node-1", request, "ghp_token")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(env.store.list(&Default::default()).await.unwrap().is_empty());
    assert_eq!(env.cluster.object_count(), 0);
}

#[tokio::test]
async fn test_scale_updates_live_and_stored_replicas() {
    let env = env();
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    let scaled = env.controller.scale(&created.id, 5).await.unwrap();
    assert_eq!(scaled.configuration.replicas, 5);

    let live = env.cluster.workload("team-apps", "shop").unwrap();
    assert_eq!(live.spec.unwrap().replicas, Some(5));
    let stored = env.controller.get(&created.id).await.unwrap();
    assert_eq!(stored.configuration.replicas, 5);
    assert_eq!(stored.status, DeploymentStatus::Running);
}

#[tokio::test]
async fn test_delete_after_partial_failure_removes_orphans() {
    let env = env_with(
        ProvisionerConfig {
            rollback_on_failure: false,
            ..ProvisionerConfig::default()
        },
        Duration::ZERO,
    );
    env.cluster
        .fail(ResourceKind::Service, Verb::Create, "quota exceeded");

    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    let failed = env.controller.get(&created.id).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert!(failed.last_error.as_deref().unwrap().contains("quota exceeded"));
    assert!(env.cluster.workload("team-apps", "shop").is_some());

    env.controller.delete(&created.id).await.unwrap();
    assert!(env.cluster.workload("team-apps", "shop").is_none());
    assert_eq!(env.cluster.object_count(), 0);
    assert_eq!(
        env.controller.get(&created.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_failed_provisioning_rolls_back_by_default() {
    let env = env();
    env.cluster
        .fail(ResourceKind::Ingress, Verb::Create, "admission webhook denied");

    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    let failed = env.controller.get(&created.id).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(env.cluster.object_count(), 0);
    assert!(failed.cluster_info.workload_name.is_empty());
}

#[tokio::test]
async fn test_retry_after_cluster_recovers() {
    let env = env();
    env.cluster
        .fail(ResourceKind::Workload, Verb::Create, "cluster unavailable");
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;
    assert_eq!(
        env.controller.get(&created.id).await.unwrap().status,
        DeploymentStatus::Failed
    );

    env.cluster.heal(ResourceKind::Workload, Verb::Create);
    env.controller.retry(&created.id).await.unwrap();
    env.controller.wait_for_task(&created.id).await;

    let record = env.controller.get(&created.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn test_cancel_during_build_then_delete() {
    let env = env_with(ProvisionerConfig::default(), Duration::from_secs(60));
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();

    let cancelled = env.controller.cancel(&created.id).await.unwrap();
    assert!(cancelled.status.is_in_flight() || cancelled.status == DeploymentStatus::Failed);
    env.controller.wait_for_task(&created.id).await;

    let record = env.controller.get(&created.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.last_error.as_deref(), Some("cancelled"));
    assert_eq!(env.cluster.object_count(), 0);

    env.controller.delete(&created.id).await.unwrap();
}

#[tokio::test]
async fn test_teardown_error_keeps_record() {
    let env = env();
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    env.cluster
        .fail(ResourceKind::Workload, Verb::Delete, "forbidden");
    let err = env.controller.delete(&created.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);

    let record = env.controller.get(&created.id).await.unwrap();
    assert_eq!(record.status, DeploymentStatus::Running);
    assert!(env.cluster.workload("team-apps", "shop").is_some());
}

#[tokio::test]
async fn test_concurrent_scales_serialize_per_deployment() {
    let env = env();
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    let mut handles = Vec::new();
    for replicas in 1..=8 {
        let controller = env.controller.clone();
        let id = created.id;
        handles.push(tokio::spawn(async move {
            controller.scale(&id, replicas).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // whichever scale ran last, the store and the cluster agree
    let stored = env.controller.get(&created.id).await.unwrap();
    let live = env.cluster.workload("team-apps", "shop").unwrap();
    assert_eq!(live.spec.unwrap().replicas, Some(stored.configuration.replicas));
}

#[tokio::test]
async fn test_reconcile_reports_pods_and_usage() {
    let env = env();
    let created = env
        .controller
        .create("user-1", "node-1", shop("shop"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&created.id).await;

    env.cluster.add_pod("team-apps", running_pod("shop-5d8f-a1"));
    env.cluster.add_pod("team-apps", running_pod("shop-5d8f-b2"));
    env.cluster.add_pod("team-apps", running_pod("other-app-1"));
    env.cluster.set_usage(
        "team-apps",
        PodUsage {
            name: "shop-5d8f-a1".into(),
            cpu_millicores: 120,
            memory_bytes: 64 * 1024 * 1024,
        },
    );

    let reporter = ReconciliationReporter::new(env.store.clone(), env.cluster.clone());
    let summary = reporter.reconcile_running().await.unwrap();
    assert_eq!(summary.reconciled, 1);
    assert_eq!(summary.failed, 0);

    let record = env.controller.get(&created.id).await.unwrap();
    assert_eq!(record.metrics.active_pods, 2);
    assert_eq!(record.metrics.ready_pods, 2);
    assert_eq!(record.metrics.desired_pods, 2);
    assert_eq!(record.metrics.cpu_usage, 120);
    assert!(record.last_health_check_at.is_some());
}

#[tokio::test]
async fn test_node_stats_and_listing() {
    let env = env();
    let a = env
        .controller
        .create("user-1", "node-1", shop("shop a"), "ghp_token")
        .await
        .unwrap();
    let b = env
        .controller
        .create("user-2", "node-2", shop("shop b"), "ghp_token")
        .await
        .unwrap();
    env.controller.wait_for_task(&a.id).await;
    env.controller.wait_for_task(&b.id).await;

    let stats = env.controller.stats(Some("node-1")).await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.count(DeploymentStatus::Running), 1);

    let all = env.controller.stats(None).await.unwrap();
    assert_eq!(all.total, 2);

    let mine = env.controller.list_by_user("user-2").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].name, "shop b");
}
