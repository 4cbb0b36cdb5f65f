//! Kubernetes implementation of `ClusterApi` using `kube`

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
    PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

use super::quantity::{cpu_millicores, memory_bytes};
use super::{
    object_name, ClusterApi, ClusterError, ClusterResult, PodUsage, ResourceKind, ServerVersion,
};

/// Cluster access through the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Build a client and verify connectivity within `timeout`.
    ///
    /// Uses the given kubeconfig file when set, otherwise infers the
    /// configuration (in-cluster service account or `~/.kube/config`).
    pub async fn connect(kubeconfig: Option<&Path>, timeout: Duration) -> ClusterResult<Self> {
        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Connection(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::Connection(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Connection(e.to_string()))?,
        };
        config.connect_timeout = Some(timeout);

        let client = Client::try_from(config).map_err(|e| ClusterError::Connection(e.to_string()))?;

        // Connectivity probe
        let namespaces: Api<Namespace> = Api::all(client.clone());
        tokio::time::timeout(timeout, namespaces.list(&ListParams::default().limit(1)))
            .await
            .map_err(|_| {
                ClusterError::Connection(format!(
                    "API server did not respond within {}s",
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| ClusterError::Connection(e.to_string()))?;

        info!("Connected to Kubernetes API server");
        Ok(Self { client })
    }

    /// Wrap an existing client without probing
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a `kube` error onto the cluster error taxonomy
fn map_error(kind: ResourceKind, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::api(kind, other.to_string()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(err) => match map_error(ResourceKind::Namespace, name, err) {
                ClusterError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let name = object_name(&namespace.metadata);
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.create(&PostParams::default(), namespace)
            .await
            .map_err(|e| map_error(ResourceKind::Namespace, &name, e))?;
        Ok(())
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Namespace, "*", e))?;
        Ok(list.items)
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> ClusterResult<()> {
        let name = object_name(&config_map.metadata);
        self.namespaced::<ConfigMap>(namespace)
            .create(&PostParams::default(), config_map)
            .await
            .map_err(|e| map_error(ResourceKind::ConfigMap, &name, e))?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.namespaced::<ConfigMap>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::ConfigMap, name, e))?;
        Ok(())
    }

    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let name = object_name(&workload.metadata);
        self.namespaced::<Deployment>(namespace)
            .create(&PostParams::default(), workload)
            .await
            .map_err(|e| map_error(ResourceKind::Workload, &name, e))?;
        Ok(())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        self.namespaced::<Deployment>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(ResourceKind::Workload, name, e))
    }

    async fn replace_workload(
        &self,
        namespace: &str,
        workload: &Deployment,
    ) -> ClusterResult<()> {
        let name = object_name(&workload.metadata);
        self.namespaced::<Deployment>(namespace)
            .replace(&name, &PostParams::default(), workload)
            .await
            .map_err(|e| map_error(ResourceKind::Workload, &name, e))?;
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.namespaced::<Deployment>(namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| map_error(ResourceKind::Workload, name, e))?;
        Ok(())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<()> {
        let name = object_name(&service.metadata);
        self.namespaced::<Service>(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| map_error(ResourceKind::Service, &name, e))?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.namespaced::<Service>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Service, name, e))?;
        Ok(())
    }

    async fn list_services(&self, namespace: &str) -> ClusterResult<Vec<Service>> {
        let list = self
            .namespaced::<Service>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Service, "*", e))?;
        Ok(list.items)
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<()> {
        let name = object_name(&ingress.metadata);
        self.namespaced::<Ingress>(namespace)
            .create(&PostParams::default(), ingress)
            .await
            .map_err(|e| map_error(ResourceKind::Ingress, &name, e))?;
        Ok(())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.namespaced::<Ingress>(namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| map_error(ResourceKind::Ingress, name, e))?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>> {
        let list = self
            .namespaced::<Pod>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Pod, "*", e))?;
        Ok(list.items)
    }

    async fn list_all_pods(&self) -> ClusterResult<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Pod, "*", e))?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> ClusterResult<String> {
        let params = LogParams {
            tail_lines: Some(tail_lines),
            ..LogParams::default()
        };
        self.namespaced::<Pod>(namespace)
            .logs(pod, &params)
            .await
            .map_err(|e| map_error(ResourceKind::Pod, pod, e))
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Node, "*", e))?;
        Ok(list.items)
    }

    async fn list_events(&self, namespace: &str) -> ClusterResult<Vec<Event>> {
        let list = self
            .namespaced::<Event>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| map_error(ResourceKind::Event, "*", e))?;
        Ok(list.items)
    }

    async fn server_version(&self) -> ClusterResult<ServerVersion> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| ClusterError::Connection(e.to_string()))?;
        Ok(ServerVersion {
            git_version: info.git_version,
            platform: info.platform,
        })
    }

    async fn pod_usage(&self, namespace: &str) -> ClusterResult<Vec<PodUsage>> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let list = match api.list(&ListParams::default()).await {
            Ok(list) => list,
            Err(kube::Error::Api(response)) if response.code == 404 || response.code == 503 => {
                debug!("Metrics API not available: {}", response.message);
                return Err(ClusterError::MetricsUnavailable);
            }
            Err(e) => return Err(map_error(ResourceKind::Pod, "*", e)),
        };

        Ok(list.items.iter().map(usage_from_metrics).collect())
    }
}

/// Sum container usage of one `PodMetrics` object
fn usage_from_metrics(obj: &DynamicObject) -> PodUsage {
    let mut usage = PodUsage {
        name: object_name(&obj.metadata),
        ..PodUsage::default()
    };

    let containers = obj
        .data
        .get("containers")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    for container in containers {
        let container_usage = &container["usage"];
        if let Some(cpu) = container_usage["cpu"].as_str().and_then(cpu_millicores) {
            usage.cpu_millicores += cpu;
        }
        if let Some(mem) = container_usage["memory"].as_str().and_then(memory_bytes) {
            usage.memory_bytes += mem;
        }
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_usage_from_metrics() {
        let obj = DynamicObject {
            types: None,
            metadata: ObjectMeta {
                name: Some("web-abc".into()),
                ..ObjectMeta::default()
            },
            data: serde_json::json!({
                "containers": [
                    {"name": "web", "usage": {"cpu": "125000000n", "memory": "64Mi"}},
                    {"name": "sidecar", "usage": {"cpu": "5m", "memory": "1Mi"}}
                ]
            }),
        };

        let usage = usage_from_metrics(&obj);
        assert_eq!(usage.name, "web-abc");
        assert_eq!(usage.cpu_millicores, 130);
        assert_eq!(usage.memory_bytes, 65 * 1024 * 1024);
    }
}
