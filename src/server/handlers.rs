//! Deployer REST API
//!
//! - Deployments: create, list, get, update, delete, restart, scale, retry,
//!   cancel, reconcile, stats
//! - Users and nodes: deployments owned by / targeted at them
//! - Repositories: metadata and branches, read with the caller's source token
//! - Cluster inspection: info, nodes, namespaces, pods, services, events, logs

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::cluster::inspect::cluster_summary;
use crate::cluster::{
    object_name, ClusterError, EventSummary, NodeSummary, OperationStatus, PodSummary,
    ResourceList, ServiceSummary,
};
use crate::deployment::{
    CreateDeploymentRequest, DeploymentError, DeploymentId, DeploymentRecord, DeploymentStatus,
    ErrorKind, UpdateDeploymentRequest,
};
use crate::server::state::AppState;
use crate::source::{Branch, RepositoryInfo};
use crate::store::DeploymentFilter;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's source-control token
pub const SOURCE_TOKEN_HEADER: &str = "x-source-token";

const DEFAULT_LOG_TAIL: i64 = 100;

/// Middleware limits
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub request_timeout: Option<Duration>,
    pub concurrency_limit: Option<usize>,
}

/// Create the deployer API router
pub fn create_router(state: AppState, options: RouterOptions) -> Router {
    let router = Router::new()
        // Deployments
        .route(
            "/v1/deployments",
            get(list_deployments).post(create_deployment),
        )
        .route("/v1/deployments/stats", get(deployment_stats))
        .route(
            "/v1/deployments/{id}",
            get(get_deployment)
                .put(update_deployment)
                .delete(delete_deployment),
        )
        .route("/v1/deployments/{id}/restart", post(restart_deployment))
        .route("/v1/deployments/{id}/scale", post(scale_deployment))
        .route("/v1/deployments/{id}/retry", post(retry_deployment))
        .route("/v1/deployments/{id}/cancel", post(cancel_deployment))
        .route("/v1/deployments/{id}/reconcile", post(reconcile_deployment))
        // Owners
        .route("/v1/users/{user_id}/deployments", get(list_user_deployments))
        .route("/v1/nodes/{node_id}/deployments", get(list_node_deployments))
        // Repositories
        .route("/v1/repositories/{owner}/{repo}", get(get_repository))
        .route(
            "/v1/repositories/{owner}/{repo}/branches",
            get(list_branches),
        )
        // Cluster inspection
        .route("/v1/cluster/info", get(cluster_info))
        .route("/v1/cluster/nodes", get(cluster_nodes))
        .route("/v1/cluster/namespaces", get(cluster_namespaces))
        .route("/v1/namespaces/{namespace}/pods", get(namespace_pods))
        .route("/v1/namespaces/{namespace}/services", get(namespace_services))
        .route("/v1/namespaces/{namespace}/events", get(namespace_events))
        .route(
            "/v1/namespaces/{namespace}/pods/{pod}/logs",
            get(pod_logs),
        )
        // Health check
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let router = match options.concurrency_limit {
        Some(limit) => router.layer(ConcurrencyLimitLayer::new(limit)),
        None => router,
    };

    let router = match options.request_timeout {
        Some(timeout) => router.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(timeout)),
        ),
        None => router,
    };

    router.with_state(state)
}

async fn handle_timeout_error(_err: tower::BoxError) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("request timed out")),
    )
}

// ============================================================================
// Errors and envelopes
// ============================================================================

/// HTTP status for an error class
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    fn new(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: msg.into(),
        }
    }
}

/// Handler error, rendered as `{"success": false, "error": ...}`
#[derive(Debug)]
pub struct ApiError(DeploymentError);

impl From<DeploymentError> for ApiError {
    fn from(err: DeploymentError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(DeploymentError::Validation(msg.into()))
    }

    fn cluster(operation: &'static str, err: ClusterError) -> Self {
        ApiError(DeploymentError::cluster(operation, err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind());
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub success: bool,
    pub deployment: DeploymentRecord,
}

impl DeploymentResponse {
    fn ok(deployment: DeploymentRecord) -> Json<Self> {
        Json(Self {
            success: true,
            deployment,
        })
    }
}

fn parse_id(raw: &str) -> ApiResult<DeploymentId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("'{}' is not a valid deployment id", raw)))
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

// ============================================================================
// Health
// ============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(OperationStatus::success("ok")))
}

// ============================================================================
// Deployment Endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeQuery {
    node_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    user_id: Option<String>,
    node_id: Option<String>,
    status: Option<String>,
    namespace: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> ApiResult<DeploymentFilter> {
        let status = self
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<DeploymentStatus>())
            .transpose()
            .map_err(ApiError::bad_request)?;
        Ok(DeploymentFilter {
            user_id: self.user_id.filter(|s| !s.is_empty()),
            node_id: self.node_id.filter(|s| !s.is_empty()),
            status,
            namespace: self.namespace.filter(|s| !s.is_empty()),
        })
    }
}

async fn create_deployment(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
    headers: HeaderMap,
    Json(request): Json<CreateDeploymentRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let node_id = query
        .node_id
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("nodeId query parameter is required"))?;
    let user_id = header(&headers, USER_ID_HEADER);
    let token = header(&headers, SOURCE_TOKEN_HEADER);

    let record = state
        .controller
        .create(&user_id, &node_id, request, &token)
        .await?;
    Ok((StatusCode::CREATED, DeploymentResponse::ok(record)))
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ResourceList<DeploymentRecord>>> {
    let filter = query.into_filter()?;
    let items = state.controller.list(&filter).await?;
    Ok(Json(ResourceList::new("DeploymentList", items)))
}

async fn deployment_stats(
    State(state): State<AppState>,
    Query(query): Query<NodeQuery>,
) -> ApiResult<impl IntoResponse> {
    let node = query.node_id.filter(|n| !n.is_empty());
    let stats = state.controller.stats(node.as_deref()).await?;
    Ok(Json(stats))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state.controller.get(&parse_id(&id)?).await?;
    Ok(DeploymentResponse::ok(record))
}

async fn update_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDeploymentRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state.controller.update(&parse_id(&id)?, request).await?;
    Ok(DeploymentResponse::ok(record))
}

async fn delete_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<OperationStatus>> {
    let id = parse_id(&id)?;
    state.controller.delete(&id).await?;
    Ok(Json(OperationStatus::success(format!(
        "Deployment {} deleted",
        id
    ))))
}

async fn restart_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state.controller.restart(&parse_id(&id)?).await?;
    Ok(DeploymentResponse::ok(record))
}

#[derive(Debug, Deserialize)]
struct ScaleRequest {
    replicas: i32,
}

async fn scale_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ScaleRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let record = state
        .controller
        .scale(&parse_id(&id)?, req.replicas)
        .await?;
    Ok(DeploymentResponse::ok(record))
}

async fn retry_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let record = state.controller.retry(&parse_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, DeploymentResponse::ok(record)))
}

async fn cancel_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let record = state.controller.cancel(&parse_id(&id)?).await?;
    Ok((StatusCode::ACCEPTED, DeploymentResponse::ok(record)))
}

async fn reconcile_deployment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let metrics = state.reporter.reconcile_by_id(&parse_id(&id)?).await?;
    Ok(Json(metrics))
}

async fn list_user_deployments(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ResourceList<DeploymentRecord>>> {
    let items = state.controller.list_by_user(&user_id).await?;
    Ok(Json(ResourceList::new("DeploymentList", items)))
}

async fn list_node_deployments(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<ResourceList<DeploymentRecord>>> {
    let items = state.controller.list_by_node(&node_id).await?;
    Ok(Json(ResourceList::new("DeploymentList", items)))
}

// ============================================================================
// Repository Endpoints
// ============================================================================

async fn get_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<RepositoryInfo>> {
    let token = header(&headers, SOURCE_TOKEN_HEADER);
    let info = state.controller.repository(&token, &owner, &repo).await?;
    Ok(Json(info))
}

async fn list_branches(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<ResourceList<Branch>>> {
    let token = header(&headers, SOURCE_TOKEN_HEADER);
    let branches = state.controller.branches(&token, &owner, &repo).await?;
    Ok(Json(ResourceList::new("BranchList", branches)))
}

// ============================================================================
// Cluster Inspection Endpoints
// ============================================================================

async fn cluster_info(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let summary = cluster_summary(state.cluster.as_ref())
        .await
        .map_err(|e| ApiError::cluster("cluster info", e))?;
    Ok(Json(summary))
}

async fn cluster_nodes(
    State(state): State<AppState>,
) -> ApiResult<Json<ResourceList<NodeSummary>>> {
    let nodes = state
        .cluster
        .list_nodes()
        .await
        .map_err(|e| ApiError::cluster("list nodes", e))?;
    let items = nodes.iter().map(NodeSummary::from_node).collect();
    Ok(Json(ResourceList::new("NodeList", items)))
}

async fn cluster_namespaces(
    State(state): State<AppState>,
) -> ApiResult<Json<ResourceList<String>>> {
    let namespaces = state
        .cluster
        .list_namespaces()
        .await
        .map_err(|e| ApiError::cluster("list namespaces", e))?;
    let items = namespaces
        .iter()
        .map(|ns| object_name(&ns.metadata))
        .collect();
    Ok(Json(ResourceList::new("NamespaceList", items)))
}

async fn namespace_pods(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<ResourceList<PodSummary>>> {
    let pods = state
        .cluster
        .list_pods(&namespace)
        .await
        .map_err(|e| ApiError::cluster("list pods", e))?;
    let now = Utc::now();
    let items = pods.iter().map(|p| PodSummary::from_pod(p, now)).collect();
    Ok(Json(ResourceList::new("PodList", items)))
}

async fn namespace_services(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<ResourceList<ServiceSummary>>> {
    let services = state
        .cluster
        .list_services(&namespace)
        .await
        .map_err(|e| ApiError::cluster("list services", e))?;
    let items = services.iter().map(ServiceSummary::from_service).collect();
    Ok(Json(ResourceList::new("ServiceList", items)))
}

async fn namespace_events(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<Json<ResourceList<EventSummary>>> {
    let events = state
        .cluster
        .list_events(&namespace)
        .await
        .map_err(|e| ApiError::cluster("list events", e))?;
    let items = events.iter().map(EventSummary::from_event).collect();
    Ok(Json(ResourceList::new("EventList", items)))
}

#[derive(Debug, Default, Deserialize)]
struct LogsQuery {
    tail: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub namespace: String,
    pub pod: String,
    pub logs: String,
}

async fn pod_logs(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let tail = query.tail.filter(|t| *t > 0).unwrap_or(DEFAULT_LOG_TAIL);
    let logs = state
        .cluster
        .pod_logs(&namespace, &pod, tail)
        .await
        .map_err(|e| ApiError::cluster("read pod logs", e))?;
    Ok(Json(LogsResponse {
        namespace,
        pod,
        logs,
    }))
}
