//! In-process cluster
//!
//! Keeps created objects in memory so the lifecycle can run without an API
//! server (`serve --in-memory`) and so tests can inspect what was
//! created. Failures and latency can be injected per resource kind and verb.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;

use super::{
    object_name, ClusterApi, ClusterError, ClusterResult, PodUsage, ResourceKind, ServerVersion,
};

/// API verbs that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Get,
    Replace,
    Delete,
    List,
}

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Cluster state held in memory
pub struct InMemoryCluster {
    namespaces: DashMap<String, Namespace>,
    config_maps: DashMap<Key, ConfigMap>,
    workloads: DashMap<Key, Deployment>,
    services: DashMap<Key, Service>,
    ingresses: DashMap<Key, Ingress>,
    pods: DashMap<Key, Pod>,
    nodes: DashMap<String, Node>,
    events: DashMap<Key, Event>,
    usage: DashMap<Key, PodUsage>,
    failures: DashMap<(ResourceKind, Verb), String>,
    delays: DashMap<(ResourceKind, Verb), Duration>,
    metrics_enabled: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            namespaces: DashMap::new(),
            config_maps: DashMap::new(),
            workloads: DashMap::new(),
            services: DashMap::new(),
            ingresses: DashMap::new(),
            pods: DashMap::new(),
            nodes: DashMap::new(),
            events: DashMap::new(),
            usage: DashMap::new(),
            failures: DashMap::new(),
            delays: DashMap::new(),
            metrics_enabled: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Test and local-run controls
    // ========================================================================

    /// Make every `verb` call on `kind` fail with an API error
    pub fn fail(&self, kind: ResourceKind, verb: Verb, message: impl Into<String>) {
        self.failures.insert((kind, verb), message.into());
    }

    /// Remove an injected failure
    pub fn heal(&self, kind: ResourceKind, verb: Verb) {
        self.failures.remove(&(kind, verb));
    }

    /// Make every `verb` call on `kind` take at least `latency`
    pub fn delay(&self, kind: ResourceKind, verb: Verb, latency: Duration) {
        self.delays.insert((kind, verb), latency);
    }

    pub fn add_pod(&self, namespace: &str, pod: Pod) {
        let name = object_name(&pod.metadata);
        self.pods.insert(key(namespace, &name), pod);
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.insert(object_name(&node.metadata), node);
    }

    pub fn add_event(&self, namespace: &str, event: Event) {
        let name = object_name(&event.metadata);
        self.events.insert(key(namespace, &name), event);
    }

    /// Install the metrics add-on with the given usage sample
    pub fn set_usage(&self, namespace: &str, usage: PodUsage) {
        self.metrics_enabled.store(true, Ordering::SeqCst);
        self.usage.insert(key(namespace, &usage.name), usage);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.namespaces.get(name).map(|n| n.clone())
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps.get(&key(namespace, name)).map(|c| c.clone())
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.workloads.get(&key(namespace, name)).map(|w| w.clone())
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services.get(&key(namespace, name)).map(|s| s.clone())
    }

    pub fn ingress(&self, namespace: &str, name: &str) -> Option<Ingress> {
        self.ingresses.get(&key(namespace, name)).map(|i| i.clone())
    }

    /// Number of deployment-owned objects (config, workload, service, ingress)
    pub fn object_count(&self) -> usize {
        self.config_maps.len() + self.workloads.len() + self.services.len() + self.ingresses.len()
    }

    /// Mutating calls in the order they were made, as `verb kind name`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, verb: Verb, kind: ResourceKind, name: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{:?} {} {}", verb, kind, name).to_lowercase());
        }
    }

    fn check(&self, kind: ResourceKind, verb: Verb) -> ClusterResult<()> {
        match self.failures.get(&(kind, verb)) {
            Some(message) => Err(ClusterError::api(kind, message.clone())),
            None => Ok(()),
        }
    }

    async fn pause(&self, kind: ResourceKind, verb: Verb) {
        let latency = self.delays.get(&(kind, verb)).map(|d| *d);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn insert<T: Clone>(
        &self,
        map: &DashMap<Key, T>,
        kind: ResourceKind,
        namespace: &str,
        name: String,
        object: &T,
    ) -> ClusterResult<()> {
        self.pause(kind, Verb::Create).await;
        self.check(kind, Verb::Create)?;
        let k = key(namespace, &name);
        if map.contains_key(&k) {
            return Err(ClusterError::AlreadyExists { kind, name });
        }
        self.record(Verb::Create, kind, &name);
        map.insert(k, object.clone());
        Ok(())
    }

    async fn remove<T>(
        &self,
        map: &DashMap<Key, T>,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<()> {
        self.pause(kind, Verb::Delete).await;
        self.check(kind, Verb::Delete)?;
        self.record(Verb::Delete, kind, name);
        map.remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    fn in_namespace<T: Clone>(map: &DashMap<Key, T>, namespace: &str) -> Vec<T> {
        map.iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn namespace_exists(&self, name: &str) -> ClusterResult<bool> {
        self.check(ResourceKind::Namespace, Verb::Get)?;
        Ok(self.namespaces.contains_key(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        self.check(ResourceKind::Namespace, Verb::Create)?;
        let name = object_name(&namespace.metadata);
        if self.namespaces.contains_key(&name) {
            return Err(ClusterError::AlreadyExists {
                kind: ResourceKind::Namespace,
                name,
            });
        }
        self.record(Verb::Create, ResourceKind::Namespace, &name);
        self.namespaces.insert(name, namespace.clone());
        Ok(())
    }

    async fn list_namespaces(&self) -> ClusterResult<Vec<Namespace>> {
        self.check(ResourceKind::Namespace, Verb::List)?;
        Ok(self.namespaces.iter().map(|n| n.value().clone()).collect())
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> ClusterResult<()> {
        let name = object_name(&config_map.metadata);
        self.insert(&self.config_maps, ResourceKind::ConfigMap, namespace, name, config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.remove(&self.config_maps, ResourceKind::ConfigMap, namespace, name).await
    }

    async fn create_workload(&self, namespace: &str, workload: &Deployment) -> ClusterResult<()> {
        let name = object_name(&workload.metadata);
        self.insert(&self.workloads, ResourceKind::Workload, namespace, name, workload).await
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> ClusterResult<Deployment> {
        self.check(ResourceKind::Workload, Verb::Get)?;
        self.workload(namespace, name)
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::Workload,
                name: name.to_string(),
            })
    }

    async fn replace_workload(
        &self,
        namespace: &str,
        workload: &Deployment,
    ) -> ClusterResult<()> {
        self.check(ResourceKind::Workload, Verb::Replace)?;
        let name = object_name(&workload.metadata);
        let k = key(namespace, &name);
        if !self.workloads.contains_key(&k) {
            return Err(ClusterError::NotFound {
                kind: ResourceKind::Workload,
                name,
            });
        }
        self.record(Verb::Replace, ResourceKind::Workload, &name);
        self.workloads.insert(k, workload.clone());
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.remove(&self.workloads, ResourceKind::Workload, namespace, name).await
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> ClusterResult<()> {
        let name = object_name(&service.metadata);
        self.insert(&self.services, ResourceKind::Service, namespace, name, service).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.remove(&self.services, ResourceKind::Service, namespace, name).await
    }

    async fn list_services(&self, namespace: &str) -> ClusterResult<Vec<Service>> {
        self.check(ResourceKind::Service, Verb::List)?;
        Ok(Self::in_namespace(&self.services, namespace))
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> ClusterResult<()> {
        let name = object_name(&ingress.metadata);
        self.insert(&self.ingresses, ResourceKind::Ingress, namespace, name, ingress).await
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.remove(&self.ingresses, ResourceKind::Ingress, namespace, name).await
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<Pod>> {
        self.check(ResourceKind::Pod, Verb::List)?;
        Ok(Self::in_namespace(&self.pods, namespace))
    }

    async fn list_all_pods(&self) -> ClusterResult<Vec<Pod>> {
        self.check(ResourceKind::Pod, Verb::List)?;
        Ok(self.pods.iter().map(|p| p.value().clone()).collect())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> ClusterResult<String> {
        self.check(ResourceKind::Pod, Verb::Get)?;
        if !self.pods.contains_key(&key(namespace, pod)) {
            return Err(ClusterError::NotFound {
                kind: ResourceKind::Pod,
                name: pod.to_string(),
            });
        }
        Ok(format!("(no logs captured for {}, tail={})\n", pod, tail_lines))
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        self.check(ResourceKind::Node, Verb::List)?;
        Ok(self.nodes.iter().map(|n| n.value().clone()).collect())
    }

    async fn list_events(&self, namespace: &str) -> ClusterResult<Vec<Event>> {
        self.check(ResourceKind::Event, Verb::List)?;
        Ok(Self::in_namespace(&self.events, namespace))
    }

    async fn server_version(&self) -> ClusterResult<ServerVersion> {
        Ok(ServerVersion {
            git_version: "v0.0.0-memory".to_string(),
            platform: "in-memory".to_string(),
        })
    }

    async fn pod_usage(&self, namespace: &str) -> ClusterResult<Vec<PodUsage>> {
        if !self.metrics_enabled.load(Ordering::SeqCst) {
            return Err(ClusterError::MetricsUnavailable);
        }
        Ok(Self::in_namespace(&self.usage, namespace))
    }
}
