//! Deployment lifecycle core
//!
//! - `naming`: canonical names for every cluster object of a deployment
//! - `manifests`: pure builders for those objects
//! - `provisioner`: ordered create with compensation, teardown, rescale, restart
//! - `controller`: status machine and lifecycle commands
//! - `reconcile`: observed pod state written back into records

pub mod controller;
pub mod error;
pub mod locks;
pub mod manifests;
pub mod model;
pub mod naming;
pub mod provisioner;
pub mod reconcile;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::LifecycleController;
pub use error::{DeploymentError, DeploymentResult, ErrorKind};
pub use model::{
    AutoScalingConfig, ClusterInfo, CreateDeploymentRequest, DeploymentConfig, DeploymentId,
    DeploymentMetrics, DeploymentRecord, DeploymentStats, DeploymentStatus, UpdateDeploymentRequest,
};
pub use naming::{derive_name, ResourceNames};
pub use provisioner::{ProvisionerConfig, ResourceProvisioner};
pub use reconcile::{ReconcileSummary, ReconciliationReporter};
