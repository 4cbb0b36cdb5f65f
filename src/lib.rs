//! nodedeployer: deploy GitHub repositories onto a shared Kubernetes cluster
//! and track each deployment through its lifecycle.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod deployment;
pub mod scheduler;
pub mod server;
pub mod source;
pub mod store;
