//! CLI module for nodedeployer
//!
//! Provides kubectl-like subcommands:
//! - `nodedeployer serve` - Run the deployer API server
//! - `nodedeployer deploy` - Create a deployment from a manifest
//! - `nodedeployer get` - List deployments, pods, nodes and stats
//! - `nodedeployer delete` / `scale` / `restart` / `retry` / `cancel`
//! - `nodedeployer context` - Manage contexts
//! - `nodedeployer logs` - View pod logs

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "nodedeployer")]
#[command(about = "Deploy GitHub repositories as workloads on a Kubernetes cluster")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the server settings file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the CLI contexts file (default: ~/.nodedeployer/config)
    #[arg(long, global = true)]
    pub contexts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the deployer API server
    Serve(ServeArgs),

    /// Create a deployment from a manifest
    Deploy(DeployArgs),

    /// Get/list resources
    Get(GetArgs),

    /// Delete a deployment and its cluster objects
    Delete(IdArgs),

    /// Change the replica count of a deployment
    Scale(ScaleArgs),

    /// Roll the pods of a deployment
    Restart(IdArgs),

    /// Relaunch a failed deployment
    Retry(IdArgs),

    /// Cancel an in-flight deployment
    Cancel(IdArgs),

    /// Refresh the metrics of a deployment from the cluster
    Reconcile(IdArgs),

    /// Manage deployer contexts
    Context(ContextArgs),

    /// View pod logs
    Logs(LogsArgs),

    /// Show cluster status
    Status,
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address for the server (overrides settings)
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Port to listen on (overrides settings)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to a .env file to load before reading settings
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Use an in-process cluster instead of a Kubernetes API server
    #[arg(long)]
    pub in_memory: bool,
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// Path to the deployment manifest (JSON or YAML)
    pub file: PathBuf,

    /// Node that owns the deployment
    #[arg(long)]
    pub node: String,

    /// Override the namespace in the manifest
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Source token (defaults to the context's token)
    #[arg(long, env = "NODEDEPLOYER_SOURCE_TOKEN", hide_env_values = true)]
    pub source_token: Option<String>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    #[command(subcommand)]
    pub resource: GetResource,
}

#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List deployments
    #[command(alias = "deploy")]
    Deployments {
        /// Only deployments in this status
        #[arg(long)]
        status: Option<String>,

        /// Only deployments of this user
        #[arg(long)]
        user: Option<String>,

        /// Only deployments of this node
        #[arg(long)]
        node: Option<String>,

        /// Only deployments in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show one deployment
    Deployment {
        id: String,

        /// Print the raw JSON record
        #[arg(short, long)]
        json: bool,
    },

    /// Deployment counts per status
    Stats {
        #[arg(long)]
        node: Option<String>,
    },

    /// List pods in a namespace
    Pods {
        #[arg(short, long)]
        namespace: String,
    },

    /// List cluster nodes
    Nodes,

    /// List namespaces
    Namespaces,

    /// Show a source repository given as `owner/name`
    Repository { repo: String },

    /// List branches of a source repository given as `owner/name`
    Branches { repo: String },
}

/// A command addressed at one deployment
#[derive(Parser, Debug)]
pub struct IdArgs {
    /// Deployment id
    pub id: String,
}

/// Arguments for the scale command
#[derive(Parser, Debug)]
pub struct ScaleArgs {
    /// Deployment id
    pub id: String,

    /// Desired replica count
    #[arg(short, long)]
    pub replicas: i32,
}

/// Arguments for the context command
#[derive(Parser, Debug)]
pub struct ContextArgs {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// List all contexts
    List,

    /// Show current context
    Current,

    /// Switch to a context
    Use { name: String },

    /// Add a new context
    Add {
        name: String,

        /// Base URL of the deployer API
        #[arg(long)]
        url: String,

        #[arg(long)]
        api_key: Option<String>,

        /// User id sent with every request
        #[arg(long)]
        user_id: Option<String>,

        /// Source token sent when creating deployments
        #[arg(long)]
        source_token: Option<String>,
    },

    /// Delete a context
    Delete { name: String },
}

/// Arguments for the logs command
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Pod name
    pub pod: String,

    #[arg(short, long)]
    pub namespace: String,

    /// Number of lines from the end
    #[arg(long, default_value = "100")]
    pub tail: i64,
}
