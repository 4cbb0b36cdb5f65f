//! Shared fixtures for unit tests

use chrono::Utc;
use uuid::Uuid;

use super::model::{DeploymentRecord, DeploymentStatus, SourceSnapshot};
use super::naming::derive_name;
use crate::config::DeploymentDefaults;
use crate::deployment::model::ConfigurationRequest;
use crate::source::RepositoryInfo;

/// A Pending record in namespace `apps` built from `acme/web`
pub fn sample_record(name: &str) -> DeploymentRecord {
    let repo = RepositoryInfo {
        owner: "acme".into(),
        name: "web".into(),
        full_name: "acme/web".into(),
        clone_url: "https://github.com/acme/web.git".into(),
        default_branch: "main".into(),
        ..RepositoryInfo::default()
    };
    let configuration =
        DeploymentDefaults::default().resolve(&ConfigurationRequest::default(), &repo, "Dockerfile");
    let now = Utc::now();

    DeploymentRecord {
        id: Uuid::nil(),
        user_id: "user-1".into(),
        node_id: "node-0".into(),
        name: name.into(),
        context_path: format!("/{}", derive_name(name)),
        namespace: "apps".into(),
        status: DeploymentStatus::Pending,
        last_error: None,
        source: SourceSnapshot {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            full_name: repo.full_name.clone(),
            branch: "main".into(),
            clone_url: repo.clone_url.clone(),
            ..SourceSnapshot::default()
        },
        metrics: crate::deployment::model::DeploymentMetrics {
            desired_pods: configuration.replicas,
            ..Default::default()
        },
        configuration,
        cluster_info: Default::default(),
        created_at: now,
        updated_at: now,
        deployed_at: None,
        last_health_check_at: None,
    }
}
