use std::sync::Arc;

use crate::cluster::ClusterApi;
use crate::deployment::{LifecycleController, ReconciliationReporter};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: LifecycleController,
    pub reporter: ReconciliationReporter,
    /// Direct access for the read-only inspection endpoints
    pub cluster: Arc<dyn ClusterApi>,
}

impl AppState {
    pub fn new(
        controller: LifecycleController,
        reporter: ReconciliationReporter,
        cluster: Arc<dyn ClusterApi>,
    ) -> Self {
        Self {
            controller,
            reporter,
            cluster,
        }
    }
}
