//! Read-only projections of live cluster objects for the API and CLI

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Node, Pod, Service};
use serde::{Deserialize, Serialize};

use super::quantity::{cpu_millicores, memory_bytes};
use super::{object_name, ClusterApi, ClusterResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    /// Ready containers over total, e.g. `1/2`
    pub ready: String,
    pub restart_count: i32,
    pub node: String,
    pub age_seconds: i64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl PodSummary {
    pub fn from_pod(pod: &Pod, now: DateTime<Utc>) -> Self {
        let status = pod.status.as_ref();
        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|c| c.as_slice())
            .unwrap_or_default();

        let ready = containers.iter().filter(|c| c.ready).count();
        let declared = pod.spec.as_ref().map(|s| s.containers.len()).unwrap_or(0);
        let total = declared.max(containers.len());

        let age_seconds = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| (now - t.0).num_seconds().max(0))
            .unwrap_or(0);

        Self {
            name: object_name(&pod.metadata),
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            phase: pod_phase(pod).to_string(),
            ready: format!("{}/{}", ready, total),
            restart_count: restart_count(pod),
            node: pod
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default(),
            age_seconds,
            labels: pod.metadata.labels.clone().unwrap_or_default(),
        }
    }
}

/// Phase of a pod, `Unknown` when not reported
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// Sum of container restart counts
pub fn restart_count(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub name: String,
    pub ready: bool,
    pub kubelet_version: String,
    pub cpu_capacity_millicores: u64,
    pub memory_capacity_bytes: u64,
}

impl NodeSummary {
    pub fn from_node(node: &Node) -> Self {
        let status = node.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false);
        let capacity = status.and_then(|s| s.capacity.as_ref());

        Self {
            name: object_name(&node.metadata),
            ready,
            kubelet_version: status
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kubelet_version.clone())
                .unwrap_or_default(),
            cpu_capacity_millicores: capacity
                .and_then(|c| c.get("cpu"))
                .and_then(|q| cpu_millicores(&q.0))
                .unwrap_or(0),
            memory_capacity_bytes: capacity
                .and_then(|c| c.get("memory"))
                .and_then(|q| memory_bytes(&q.0))
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    pub cluster_ip: String,
    pub ports: Vec<String>,
}

impl ServiceSummary {
    pub fn from_service(service: &Service) -> Self {
        let spec = service.spec.as_ref();
        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| {
                        format!("{}/{}", p.port, p.protocol.as_deref().unwrap_or("TCP"))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: object_name(&service.metadata),
            namespace: service.metadata.namespace.clone().unwrap_or_default(),
            service_type: spec
                .and_then(|s| s.type_.clone())
                .unwrap_or_else(|| "ClusterIP".to_string()),
            cluster_ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
            ports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub name: String,
    pub event_type: String,
    pub reason: String,
    pub message: String,
    pub object: String,
    pub count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl EventSummary {
    pub fn from_event(event: &Event) -> Self {
        let involved = &event.involved_object;
        Self {
            name: object_name(&event.metadata),
            event_type: event.type_.clone().unwrap_or_default(),
            reason: event.reason.clone().unwrap_or_default(),
            message: event.message.clone().unwrap_or_default(),
            object: format!(
                "{}/{}",
                involved.kind.as_deref().unwrap_or(""),
                involved.name.as_deref().unwrap_or("")
            ),
            count: event.count.unwrap_or(1),
            last_seen: event.last_timestamp.as_ref().map(|t| t.0),
        }
    }
}

/// Cluster-wide totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub version: String,
    pub platform: String,
    pub nodes_count: usize,
    pub namespaces_count: usize,
    pub pods_count: usize,
    pub pods_running: usize,
    pub pods_pending: usize,
    pub pods_failed: usize,
    pub total_cpu_millicores: u64,
    pub total_memory_bytes: u64,
}

/// Gather a summary from the cluster
pub async fn cluster_summary(cluster: &dyn ClusterApi) -> ClusterResult<ClusterSummary> {
    let version = cluster.server_version().await?;
    let nodes = cluster.list_nodes().await?;
    let namespaces = cluster.list_namespaces().await?;
    let pods = cluster.list_all_pods().await?;

    let mut summary = ClusterSummary {
        version: version.git_version,
        platform: version.platform,
        nodes_count: nodes.len(),
        namespaces_count: namespaces.len(),
        pods_count: pods.len(),
        ..ClusterSummary::default()
    };

    for pod in &pods {
        match pod_phase(pod) {
            "Running" => summary.pods_running += 1,
            "Pending" => summary.pods_pending += 1,
            "Failed" => summary.pods_failed += 1,
            _ => {}
        }
    }

    for node in nodes.iter().map(NodeSummary::from_node) {
        summary.total_cpu_millicores += node.cpu_capacity_millicores;
        summary.total_memory_bytes += node.memory_capacity_bytes;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use k8s_openapi::api::core::v1::{
        ContainerStatus, NodeCondition, NodeStatus, PodSpec, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod(name: &str, phase: &str, restarts: i32) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                creation_timestamp: Some(Time(Utc::now() - chrono::Duration::seconds(90))),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-1".to_string()),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "web".to_string(),
                    ready: phase == "Running",
                    restart_count: restarts,
                    ..ContainerStatus::default()
                }]),
                ..PodStatus::default()
            }),
        }
    }

    #[test]
    fn test_pod_summary() {
        let summary = PodSummary::from_pod(&pod("web-1", "Running", 2), Utc::now());
        assert_eq!(summary.name, "web-1");
        assert_eq!(summary.phase, "Running");
        assert_eq!(summary.ready, "1/1");
        assert_eq!(summary.restart_count, 2);
        assert_eq!(summary.node, "worker-1");
        assert!(summary.age_seconds >= 90);
    }

    #[test]
    fn test_node_summary() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".into()),
                ..ObjectMeta::default()
            },
            status: Some(NodeStatus {
                capacity: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity("4".to_string())),
                    ("memory".to_string(), Quantity("8Gi".to_string())),
                ])),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".into(),
                    status: "True".into(),
                    ..NodeCondition::default()
                }]),
                ..NodeStatus::default()
            }),
            ..Node::default()
        };

        let summary = NodeSummary::from_node(&node);
        assert!(summary.ready);
        assert_eq!(summary.cpu_capacity_millicores, 4000);
        assert_eq!(summary.memory_capacity_bytes, 8 * 1024 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_cluster_summary_counts_phases() {
        let cluster = InMemoryCluster::new();
        cluster.add_pod("apps", pod("a", "Running", 0));
        cluster.add_pod("apps", pod("b", "Pending", 0));
        cluster.add_pod("other", pod("c", "Failed", 0));

        let summary = cluster_summary(&cluster).await.unwrap();
        assert_eq!(summary.pods_count, 3);
        assert_eq!(summary.pods_running, 1);
        assert_eq!(summary.pods_pending, 1);
        assert_eq!(summary.pods_failed, 1);
        assert_eq!(summary.platform, "in-memory");
    }
}
