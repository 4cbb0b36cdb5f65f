//! Shared response envelopes for the deployer API

use serde::{Deserialize, Serialize};

/// API version stamped on list responses
pub const API_VERSION: &str = "nodedeployer/v1";

/// Response for listing resources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Kind (e.g., "DeploymentList", "PodList")
    pub kind: String,

    /// Number of items
    pub count: usize,

    /// List of items
    pub items: Vec<T>,
}

impl<T> ResourceList<T> {
    /// Create a new resource list
    pub fn new(kind: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.into(),
            count: items.len(),
            items,
        }
    }
}

/// Status of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Success or failure
    pub success: bool,

    /// Status message
    pub message: String,

    /// Details (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl OperationStatus {
    /// Create success status
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: None,
        }
    }

    /// Create failure status
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }

    /// Add details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_list() {
        let list: ResourceList<String> =
            ResourceList::new("DeploymentList", vec!["a".into(), "b".into()]);
        assert_eq!(list.count, 2);
        assert_eq!(list.kind, "DeploymentList");
        assert_eq!(list.api_version, API_VERSION);
    }

    #[test]
    fn test_operation_status() {
        let success = OperationStatus::success("Deployment restarted")
            .with_details(serde_json::json!({"replicas": 3}));
        assert!(success.success);
        assert_eq!(success.details.unwrap()["replicas"], 3);

        let failure = OperationStatus::failure("Deployment not found");
        assert!(!failure.success);
        assert!(failure.details.is_none());
    }
}
