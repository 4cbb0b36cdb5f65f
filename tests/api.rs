//! HTTP API tests driving the full router with the in-process cluster

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use nodedeployer::cluster::InMemoryCluster;
use nodedeployer::deployment::{
    DeploymentId, LifecycleController, ProvisionerConfig, ReconciliationReporter,
    ResourceProvisioner,
};
use nodedeployer::server::{create_router, AppState, RouterOptions};
use nodedeployer::source::StaticSource;
use nodedeployer::store::{DeploymentStore, InMemoryStore};

struct App {
    router: Router,
    controller: LifecycleController,
    cluster: Arc<InMemoryCluster>,
}

fn app() -> App {
    let cluster = Arc::new(InMemoryCluster::new());
    let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryStore::new());
    let source = Arc::new(StaticSource::new().with_repository(
        "acme",
        "api",
        &["main"],
        Some("Dockerfile"),
    ));
    let controller = LifecycleController::new(
        store.clone(),
        source,
        ResourceProvisioner::new(cluster.clone(), ProvisionerConfig::default()),
    )
    .with_default_namespace("apps")
    .with_build_delay(Duration::ZERO);
    let reporter = ReconciliationReporter::new(store, cluster.clone());
    let state = AppState::new(controller.clone(), reporter, cluster.clone());
    let router = create_router(
        state,
        RouterOptions {
            request_timeout: Some(Duration::from_secs(5)),
            concurrency_limit: Some(16),
        },
    );
    App {
        router,
        controller,
        cluster,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn create_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/deployments?nodeId=node-7")
        .header("content-type", "application/json")
        .header("x-user-id", "user-9")
        .header("x-source-token", "ghp_token")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_create_poll_scale_delete() {
    let app = app();

    let (status, body) = send(
        &app.router,
        create_request(json!({
            "name": "Orders API",
            "contextPath": "/orders",
            "repository": {"owner": "acme", "name": "api", "branch": "main"},
            "configuration": {"replicas": 1, "environmentVars": {"MODE": "prod"}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["deployment"]["status"], "pending");
    assert_eq!(body["deployment"]["userId"], "user-9");
    assert_eq!(body["deployment"]["nodeId"], "node-7");

    let id: DeploymentId = body["deployment"]["id"].as_str().unwrap().parse().unwrap();
    app.controller.wait_for_task(&id).await;

    let (status, body) = send(&app.router, get(&format!("/v1/deployments/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment"]["status"], "running");
    assert_eq!(body["deployment"]["clusterInfo"]["workloadName"], "orders-api");
    assert!(app.cluster.config_map("apps", "orders-api-config").is_some());

    let (status, body) = send(
        &app.router,
        post_json(&format!("/v1/deployments/{}/scale", id), json!({"replicas": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment"]["configuration"]["replicas"], 5);

    let (status, body) = send(&app.router, get("/v1/nodes/node-7/deployments")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/v1/deployments/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(&app.router, get(&format!("/v1/deployments/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.cluster.object_count(), 0);
}

#[tokio::test]
async fn test_validation_errors_are_bad_request() {
    let app = app();

    let (status, body) = send(
        &app.router,
        create_request(json!({
            "name": "orders",
            "contextPath": "orders",
            "repository": {"owner": "acme", "name": "api", "branch": "main"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &app.router,
        create_request(json!({
            "name": "orders",
            "contextPath": "/orders",
            "repository": {"owner": "acme", "name": "api", "branch": "main"},
            "configuration": {"memoryLimit": "lots"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_repository_is_bad_gateway() {
    let app = app();
    let (status, body) = send(
        &app.router,
        create_request(json!({
            "name": "ghost",
            "contextPath": "/ghost",
            "repository": {"owner": "acme", "name": "ghost", "branch": "main"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("fetch repository"));
}

#[tokio::test]
async fn test_retry_of_running_deployment_conflicts() {
    let app = app();
    let (_, body) = send(
        &app.router,
        create_request(json!({
            "name": "orders",
            "contextPath": "/orders",
            "repository": {"owner": "acme", "name": "api", "branch": "main"}
        })),
    )
    .await;
    let id: DeploymentId = body["deployment"]["id"].as_str().unwrap().parse().unwrap();
    app.controller.wait_for_task(&id).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/v1/deployments/{}/retry", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reconcile_endpoint_returns_metrics() {
    let app = app();
    let (_, body) = send(
        &app.router,
        create_request(json!({
            "name": "orders",
            "contextPath": "/orders",
            "repository": {"owner": "acme", "name": "api", "branch": "main"}
        })),
    )
    .await;
    let id: DeploymentId = body["deployment"]["id"].as_str().unwrap().parse().unwrap();
    app.controller.wait_for_task(&id).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/v1/deployments/{}/reconcile", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activePods"], 0);
    assert_eq!(body["desiredPods"], 2);
}

#[tokio::test]
async fn test_cluster_info_endpoint() {
    let app = app();
    let (status, body) = send(&app.router, get("/v1/cluster/info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodesCount"], 0);
}

#[tokio::test]
async fn test_branch_listing_for_repository() {
    let app = app();
    let request = Request::builder()
        .uri("/v1/repositories/acme/api/branches")
        .header("x-source-token", "ghp_token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "BranchList");
    assert_eq!(body["count"], 1);
    assert_eq!(body["items"][0]["name"], "main");

    let (status, body) = send(&app.router, get("/v1/repositories/acme/api")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["defaultBranch"], "main");

    let (status, _) = send(&app.router, get("/v1/repositories/acme/ghost/branches")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
