//! Deployment defaults policy
//!
//! Caller-supplied configuration is merged over this policy to produce the
//! fully resolved `DeploymentConfig` that gets persisted. Absent request
//! fields take the policy value; nothing is inferred from zero values.

use serde::{Deserialize, Serialize};

use crate::cluster::quantity::{cpu_millicores, is_valid_quantity, memory_bytes};
use crate::deployment::model::{
    BuildConfig, ConfigurationRequest, DeploymentConfig, HealthCheckConfig,
};
use crate::source::RepositoryInfo;

/// Documented defaults applied at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentDefaults {
    pub replicas: i32,
    pub memory_request: String,
    pub memory_limit: String,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub container_port: i32,
    pub service_port: i32,
    pub image_pull_policy: String,
    pub restart_policy: String,
    pub image_tag: String,
    pub build_context: String,
    pub health_check_path: String,
    pub health_check_initial_delay_seconds: i32,
    pub health_check_period_seconds: i32,
    pub health_check_timeout_seconds: i32,
    pub health_check_success_threshold: i32,
    pub health_check_failure_threshold: i32,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            replicas: 2,
            memory_request: "256Mi".to_string(),
            memory_limit: "512Mi".to_string(),
            cpu_request: "250m".to_string(),
            cpu_limit: "500m".to_string(),
            container_port: 8080,
            service_port: 80,
            image_pull_policy: "IfNotPresent".to_string(),
            restart_policy: "Always".to_string(),
            image_tag: "latest".to_string(),
            build_context: ".".to_string(),
            health_check_path: "/health".to_string(),
            health_check_initial_delay_seconds: 30,
            health_check_period_seconds: 10,
            health_check_timeout_seconds: 5,
            health_check_success_threshold: 1,
            health_check_failure_threshold: 3,
        }
    }
}

impl DeploymentDefaults {
    /// Merge a request over the policy.
    ///
    /// `recipe_path` is the build recipe found in the repository; the image
    /// name defaults to `<owner>/<repo>`.
    pub fn resolve(
        &self,
        request: &ConfigurationRequest,
        repo: &RepositoryInfo,
        recipe_path: &str,
    ) -> DeploymentConfig {
        let container_port = request.container_port.unwrap_or(self.container_port);
        let build = request.build.clone().unwrap_or_default();

        let health_check = match &request.health_check {
            Some(hc) => HealthCheckConfig {
                enabled: hc.enabled,
                path: hc.path.clone().unwrap_or_else(|| self.health_check_path.clone()),
                port: hc.port.unwrap_or(container_port),
                initial_delay_seconds: hc
                    .initial_delay_seconds
                    .unwrap_or(self.health_check_initial_delay_seconds),
                period_seconds: hc.period_seconds.unwrap_or(self.health_check_period_seconds),
                timeout_seconds: hc.timeout_seconds.unwrap_or(self.health_check_timeout_seconds),
                success_threshold: hc
                    .success_threshold
                    .unwrap_or(self.health_check_success_threshold),
                failure_threshold: hc
                    .failure_threshold
                    .unwrap_or(self.health_check_failure_threshold),
            },
            None => HealthCheckConfig {
                enabled: false,
                path: self.health_check_path.clone(),
                port: container_port,
                initial_delay_seconds: self.health_check_initial_delay_seconds,
                period_seconds: self.health_check_period_seconds,
                timeout_seconds: self.health_check_timeout_seconds,
                success_threshold: self.health_check_success_threshold,
                failure_threshold: self.health_check_failure_threshold,
            },
        };

        DeploymentConfig {
            replicas: request.replicas.unwrap_or(self.replicas),
            container_port,
            service_port: request.service_port.unwrap_or(self.service_port),
            memory_request: pick(&request.memory_request, &self.memory_request),
            memory_limit: pick(&request.memory_limit, &self.memory_limit),
            cpu_request: pick(&request.cpu_request, &self.cpu_request),
            cpu_limit: pick(&request.cpu_limit, &self.cpu_limit),
            environment_vars: request.environment_vars.clone(),
            auto_scaling: request.auto_scaling.clone(),
            health_check,
            image_pull_policy: pick(&request.image_pull_policy, &self.image_pull_policy),
            restart_policy: pick(&request.restart_policy, &self.restart_policy),
            build: BuildConfig {
                dockerfile: build.dockerfile.unwrap_or_else(|| recipe_path.to_string()),
                build_context: build
                    .build_context
                    .unwrap_or_else(|| self.build_context.clone()),
                build_args: build.build_args,
                image_name: build
                    .image_name
                    .unwrap_or_else(|| format!("{}/{}", repo.owner, repo.name)),
                image_tag: build.image_tag.unwrap_or_else(|| self.image_tag.clone()),
                registry_url: build.registry_url,
            },
        }
    }

    /// Check a request merged over the policy before the repository is known.
    ///
    /// Build settings are not validated, so no source lookup is needed.
    pub fn validate_request(&self, request: &ConfigurationRequest) -> Result<(), String> {
        validate_config(&self.resolve(request, &RepositoryInfo::default(), ""))
    }
}

fn pick(value: &Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => default.to_string(),
    }
}

/// Check a resolved configuration; returns the first problem found
pub fn validate_config(config: &DeploymentConfig) -> Result<(), String> {
    if config.replicas < 0 {
        return Err("replicas must not be negative".to_string());
    }
    for (label, port) in [
        ("container port", config.container_port),
        ("service port", config.service_port),
    ] {
        if !(1..=65535).contains(&port) {
            return Err(format!("{} must be between 1 and 65535, got {}", label, port));
        }
    }
    for (label, value) in [
        ("memory request", &config.memory_request),
        ("memory limit", &config.memory_limit),
        ("cpu request", &config.cpu_request),
        ("cpu limit", &config.cpu_limit),
    ] {
        if !is_valid_quantity(value) {
            return Err(format!("{} '{}' is not a valid quantity", label, value));
        }
    }
    if memory_bytes(&config.memory_request) > memory_bytes(&config.memory_limit) {
        return Err("memory request exceeds memory limit".to_string());
    }
    if cpu_millicores(&config.cpu_request) > cpu_millicores(&config.cpu_limit) {
        return Err("cpu request exceeds cpu limit".to_string());
    }
    if let Some(policy) = &config.auto_scaling {
        if policy.enabled && (policy.min_replicas < 1 || policy.max_replicas < policy.min_replicas)
        {
            return Err("auto-scaling requires 1 <= minReplicas <= maxReplicas".to_string());
        }
    }
    if config.health_check.enabled && !config.health_check.path.starts_with('/') {
        return Err("health check path must start with '/'".to_string());
    }
    Ok(())
}
