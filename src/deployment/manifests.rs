//! Pure builders for the cluster objects owned by a deployment

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::model::{DeploymentConfig, DeploymentRecord, HealthCheckConfig};
use super::naming::{ResourceNames, APP_LABEL};

/// Label identifying objects created by this system
pub const MANAGED_BY_LABEL: &str = "managed-by";

/// Annotation recording the source repository and branch
pub const SOURCE_ANNOTATION: &str = "nodedeployer.io/source";

/// Pod-template annotation bumped to force a rolling restart
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Ingress annotation rewriting the matched prefix to `/`
pub const REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";

/// Readiness probes always start after this many seconds
pub const READINESS_INITIAL_DELAY_SECS: i32 = 5;

/// Cluster-wide options shared by every manifest
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub managed_by: String,
    pub ingress_class: Option<String>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            managed_by: "nodedeployer".to_string(),
            ingress_class: None,
        }
    }
}

fn labels(names: &ResourceNames, options: &ManifestOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), names.workload.clone()),
        (MANAGED_BY_LABEL.to_string(), options.managed_by.clone()),
    ])
}

fn meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..ObjectMeta::default()
    }
}

pub fn namespace(name: &str, options: &ManifestOptions) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                options.managed_by.clone(),
            )])),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn config_map(
    record: &DeploymentRecord,
    names: &ResourceNames,
    options: &ManifestOptions,
) -> ConfigMap {
    ConfigMap {
        metadata: meta(&names.config_map, &record.namespace, labels(names, options)),
        data: Some(record.configuration.environment_vars.clone()),
        ..ConfigMap::default()
    }
}

fn resources(config: &DeploymentConfig) -> ResourceRequirements {
    let quantities = |memory: &str, cpu: &str| {
        BTreeMap::from([
            ("memory".to_string(), Quantity(memory.to_string())),
            ("cpu".to_string(), Quantity(cpu.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(quantities(&config.memory_request, &config.cpu_request)),
        limits: Some(quantities(&config.memory_limit, &config.cpu_limit)),
        ..ResourceRequirements::default()
    }
}

fn probe(check: &HealthCheckConfig, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(check.path.clone()),
            port: IntOrString::Int(check.port),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(check.period_seconds),
        timeout_seconds: Some(check.timeout_seconds),
        success_threshold: Some(check.success_threshold),
        failure_threshold: Some(check.failure_threshold),
        ..Probe::default()
    }
}

pub fn workload(
    record: &DeploymentRecord,
    names: &ResourceNames,
    options: &ManifestOptions,
) -> Deployment {
    let config = &record.configuration;
    let labels = labels(names, options);

    let env: Vec<EnvVar> = config
        .environment_vars
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..EnvVar::default()
        })
        .collect();

    let (liveness, readiness) = if config.health_check.enabled {
        (
            Some(probe(
                &config.health_check,
                config.health_check.initial_delay_seconds,
            )),
            Some(probe(&config.health_check, READINESS_INITIAL_DELAY_SECS)),
        )
    } else {
        (None, None)
    };

    let container = Container {
        name: names.workload.clone(),
        image: Some(config.build.image_ref()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            container_port: config.container_port,
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        resources: Some(resources(config)),
        liveness_probe: liveness,
        readiness_probe: readiness,
        ..Container::default()
    };

    let mut metadata = meta(&names.workload, &record.namespace, labels.clone());
    metadata.annotations = Some(BTreeMap::from([(
        SOURCE_ANNOTATION.to_string(),
        format!("{}@{}", record.source.full_name, record.source.branch),
    )]));

    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    APP_LABEL.to_string(),
                    names.workload.clone(),
                )])),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some(config.restart_policy.clone()),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

pub fn service(
    record: &DeploymentRecord,
    names: &ResourceNames,
    options: &ManifestOptions,
) -> Service {
    let config = &record.configuration;
    Service {
        metadata: meta(&names.service, &record.namespace, labels(names, options)),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                names.workload.clone(),
            )])),
            ports: Some(vec![ServicePort {
                port: config.service_port,
                target_port: Some(IntOrString::Int(config.container_port)),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

pub fn ingress(
    record: &DeploymentRecord,
    names: &ResourceNames,
    options: &ManifestOptions,
) -> Ingress {
    let mut metadata = meta(&names.ingress, &record.namespace, labels(names, options));
    metadata.annotations = Some(BTreeMap::from([(
        REWRITE_TARGET_ANNOTATION.to_string(),
        "/".to_string(),
    )]));

    Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: options.ingress_class.clone(),
            rules: Some(vec![IngressRule {
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(record.context_path.clone()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: names.service.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(record.configuration.service_port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
                ..IngressRule::default()
            }]),
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    }
}

/// Set the pod-template restart annotation on a live workload
pub fn stamp_restart(workload: &mut Deployment, timestamp: &str) {
    let spec = workload.spec.get_or_insert_with(DeploymentSpec::default);
    let template_meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
    template_meta
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(RESTARTED_AT_ANNOTATION.to_string(), timestamp.to_string());
}

/// Overwrite the replica count of a live workload
pub fn set_replicas(workload: &mut Deployment, replicas: i32) {
    workload
        .spec
        .get_or_insert_with(DeploymentSpec::default)
        .replicas = Some(replicas);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::testing::sample_record;

    fn build(record: &DeploymentRecord) -> (ResourceNames, ManifestOptions) {
        (record.resource_names(), ManifestOptions::default())
    }

    #[test]
    fn test_workload_shape() {
        let mut record = sample_record("My App");
        record
            .configuration
            .environment_vars
            .insert("LOG_LEVEL".into(), "debug".into());
        let (names, options) = build(&record);
        let workload = workload(&record, &names, &options);

        assert_eq!(workload.metadata.name.as_deref(), Some("my-app"));
        let labels = workload.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("my-app"));
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some("nodedeployer")
        );

        let spec = workload.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get("app").map(String::as_str),
            Some("my-app")
        );

        let pod = spec.template.spec.as_ref().unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.name, "my-app");
        assert_eq!(container.image.as_deref(), Some("acme/web:latest"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
        assert_eq!(container.env.as_ref().unwrap()[0].name, "LOG_LEVEL");
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits["memory"].0, "512Mi");
        assert_eq!(limits["cpu"].0, "500m");
        assert!(container.liveness_probe.is_none());
        assert_eq!(pod.restart_policy.as_deref(), Some("Always"));
    }

    #[test]
    fn test_probes_when_health_check_enabled() {
        let mut record = sample_record("web");
        record.configuration.health_check.enabled = true;
        record.configuration.health_check.initial_delay_seconds = 45;
        let (names, options) = build(&record);
        let workload = workload(&record, &names, &options);

        let container = &workload.spec.unwrap().template.spec.unwrap().containers[0];
        let liveness = container.liveness_probe.as_ref().unwrap();
        let readiness = container.readiness_probe.as_ref().unwrap();
        assert_eq!(liveness.initial_delay_seconds, Some(45));
        assert_eq!(readiness.initial_delay_seconds, Some(READINESS_INITIAL_DELAY_SECS));
        assert_eq!(
            liveness.http_get.as_ref().unwrap().path.as_deref(),
            Some("/health")
        );
        assert_eq!(liveness.period_seconds, readiness.period_seconds);
    }

    #[test]
    fn test_service_and_ingress() {
        let record = sample_record("web");
        let (names, options) = build(&record);

        let svc = service(&record, &names, &options);
        assert_eq!(svc.metadata.name.as_deref(), Some("web-service"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));

        let ing = ingress(&record, &names, &options);
        assert_eq!(ing.metadata.name.as_deref(), Some("web-ingress"));
        assert_eq!(
            ing.metadata.annotations.as_ref().unwrap()[REWRITE_TARGET_ANNOTATION],
            "/"
        );
        let rule = &ing.spec.unwrap().rules.unwrap()[0];
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/web"));
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "web-service");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn test_stamp_restart_and_replicas() {
        let record = sample_record("web");
        let (names, options) = build(&record);
        let mut live = workload(&record, &names, &options);

        stamp_restart(&mut live, "2026-01-01T00:00:00Z");
        set_replicas(&mut live, 5);

        let spec = live.spec.unwrap();
        assert_eq!(spec.replicas, Some(5));
        let annotations = spec.template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations[RESTARTED_AT_ANNOTATION], "2026-01-01T00:00:00Z");
    }
}
