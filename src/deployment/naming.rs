//! Canonical name derivation
//!
//! Every cluster object created for a deployment is named from one canonical
//! identifier derived from the user-supplied display name. The derivation is
//! pure, total and idempotent, and its output is always a valid DNS-1123 label
//! (or empty, which callers reject).

use serde::{Deserialize, Serialize};

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LEN: usize = 63;

/// Label key shared by the workload selector and every created object
pub const APP_LABEL: &str = "app";

/// Derive the canonical resource name from a display name.
///
/// Lower-cases, maps `_` and spaces to `-`, drops everything outside
/// `[a-z0-9-]`, trims hyphens and truncates to 63 characters.
pub fn derive_name(raw: &str) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    let trimmed = mapped.trim_matches('-');
    let truncated: String = trimmed.chars().take(MAX_NAME_LEN).collect();

    // truncation can expose a trailing hyphen
    truncated.trim_end_matches('-').to_string()
}

/// Names of every cluster object owned by one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub workload: String,
    pub config_map: String,
    pub service: String,
    pub ingress: String,
}

impl ResourceNames {
    /// Compute child names from an already-derived canonical name
    pub fn for_canonical(canonical: &str) -> Self {
        Self {
            workload: canonical.to_string(),
            config_map: format!("{}-config", canonical),
            service: format!("{}-service", canonical),
            ingress: format!("{}-ingress", canonical),
        }
    }

    /// Compute child names from a display name
    pub fn from_display_name(name: &str) -> Self {
        Self::for_canonical(&derive_name(name))
    }

    /// Pod selector in `key=value` form
    pub fn selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.workload)
    }

    /// In-cluster DNS URL of the service
    pub fn internal_url(&self, namespace: &str, service_port: i32) -> String {
        format!(
            "http://{}.{}.svc.cluster.local:{}",
            self.service, namespace, service_port
        )
    }

    /// Prefix shared by every pod the workload creates
    pub fn pod_prefix(&self) -> String {
        format!("{}-", self.workload)
    }
}
