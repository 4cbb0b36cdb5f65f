use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nodedeployer::cli::{
    context_add, context_current, context_delete, context_list, context_use,
    format_cluster_status, format_context_list, format_current_context, format_deployment_detail,
    format_branch_list, format_deployment_list, format_metrics, format_namespace_list,
    format_node_list, format_pod_list, format_repository, format_stats, load_deploy_manifest,
    parse_repository_slug, Cli, Commands, ContextAction, DeployerClient, GetResource, ServeArgs,
};
use nodedeployer::cluster::{ClusterApi, InMemoryCluster, KubeCluster, NodeSummary, PodSummary};
use nodedeployer::config::{load_settings, Settings};
use nodedeployer::context::{default_config_path, load_config_from, save_config_to, Config};
use nodedeployer::deployment::manifests::ManifestOptions;
use nodedeployer::deployment::{
    DeploymentRecord, LifecycleController, ProvisionerConfig, ReconciliationReporter,
    ResourceProvisioner,
};
use nodedeployer::scheduler::spawn_reconcile_loop;
use nodedeployer::server::{create_router, AppState, RouterOptions};
use nodedeployer::source::GitHubClient;
use nodedeployer::store::{DeploymentStore, InMemoryStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let contexts_path = cli.contexts.clone().unwrap_or_else(default_config_path);

    let result = match cli.command {
        Commands::Serve(args) => serve(args, cli.config.as_deref()).await,
        command => run_client(command, &contexts_path).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

// ============================================================================
// Server
// ============================================================================

async fn serve(args: ServeArgs, settings_path: Option<&Path>) -> anyhow::Result<()> {
    // .env is optional unless named explicitly
    match args.env_file {
        Some(ref env_file) => {
            dotenvy::from_path(env_file)
                .with_context(|| format!("failed to load env file {}", env_file.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let mut settings = load_settings(settings_path).context("failed to load settings")?;
    if let Some(bind_addr) = args.bind_addr {
        settings.server.bind_addr = bind_addr;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if args.in_memory {
        settings.cluster.in_memory = true;
    }

    let cluster = connect_cluster(&settings).await?;
    let source = GitHubClient::new(
        settings.source.api_url.clone(),
        std::time::Duration::from_secs(settings.source.request_timeout_secs),
    )
    .context("failed to build source control client")?
    .with_recipe_paths(settings.source.recipe_paths.clone());
    let store: Arc<dyn DeploymentStore> = Arc::new(InMemoryStore::new());

    let provisioner = ResourceProvisioner::new(
        cluster.clone(),
        ProvisionerConfig {
            manifests: ManifestOptions {
                managed_by: settings.cluster.managed_by.clone(),
                ingress_class: settings.cluster.ingress_class.clone(),
            },
            ingress_base_url: settings.cluster.ingress_base_url.clone(),
            rollback_on_failure: settings.cluster.rollback_on_failure,
        },
    );
    let controller = LifecycleController::new(store.clone(), Arc::new(source), provisioner)
        .with_defaults(settings.defaults.clone())
        .with_default_namespace(settings.cluster.default_namespace.clone())
        .with_build_delay(settings.build_delay());
    let reporter = ReconciliationReporter::new(store, cluster.clone());

    let reconciler = settings
        .reconcile_interval()
        .map(|every| spawn_reconcile_loop(reporter.clone(), every));

    let state = AppState::new(controller.clone(), reporter, cluster);
    let app = create_router(
        state,
        RouterOptions {
            request_timeout: settings.server.request_timeout(),
            concurrency_limit: settings.server.concurrency_limit,
        },
    );

    let addr = settings.server.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!("nodedeployer listening on {}", addr);
    info!("Default namespace: {}", settings.cluster.default_namespace);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down, cancelling in-flight deployments");
    controller.shutdown();
    if let Some(stop) = reconciler {
        let _ = stop.send(());
    }
    Ok(())
}

async fn connect_cluster(settings: &Settings) -> anyhow::Result<Arc<dyn ClusterApi>> {
    if settings.cluster.in_memory {
        warn!("Using the in-memory cluster; nothing is deployed for real");
        return Ok(Arc::new(InMemoryCluster::new()));
    }
    let kubeconfig = settings.cluster.kubeconfig_path();
    let cluster = KubeCluster::connect(kubeconfig.as_deref(), settings.cluster.connect_timeout())
        .await
        .context("failed to connect to the cluster")?;
    Ok(Arc::new(cluster))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}

// ============================================================================
// Client commands
// ============================================================================

async fn run_client(command: Commands, contexts_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config_from(contexts_path)?;

    let command = match command {
        Commands::Context(args) => return run_context(args.action, &mut config, contexts_path),
        other => other,
    };

    let client = DeployerClient::from_context(&config)?;

    match command {
        Commands::Deploy(args) => {
            let mut request = load_deploy_manifest(&args.file)?;
            if args.namespace.is_some() {
                request.namespace = args.namespace;
            }
            let client = match args.source_token {
                Some(token) => client.with_source_token(token),
                None => client,
            };
            let record = client.create(&args.node, &request).await?;
            println!(
                "deployment \"{}\" created ({}), status {}",
                record.name, record.id, record.status
            );
        }
        Commands::Get(args) => match args.resource {
            GetResource::Deployments {
                status,
                user,
                node,
                namespace,
            } => {
                let mut filters = Vec::new();
                for (key, value) in [
                    ("status", status),
                    ("userId", user),
                    ("nodeId", node),
                    ("namespace", namespace),
                ] {
                    if let Some(v) = value {
                        filters.push((key, v));
                    }
                }
                let filters: Vec<(&str, &str)> =
                    filters.iter().map(|(k, v)| (*k, v.as_str())).collect();
                let items = client.list(&filters).await?;
                print!("{}", format_deployment_list(&items, Utc::now()));
            }
            GetResource::Deployment { id, json } => {
                let record = client.get(&id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                } else {
                    print!("{}", format_deployment_detail(&record));
                }
            }
            GetResource::Stats { node } => {
                let stats = client.stats(node.as_deref()).await?;
                print!("{}", format_stats(&stats));
            }
            GetResource::Pods { namespace } => {
                let path = format!("/v1/namespaces/{}/pods", namespace);
                let pods: Vec<PodSummary> = client.items(&path).await?;
                print!("{}", format_pod_list(&pods));
            }
            GetResource::Nodes => {
                let nodes: Vec<NodeSummary> = client.items("/v1/cluster/nodes").await?;
                print!("{}", format_node_list(&nodes));
            }
            GetResource::Namespaces => {
                let namespaces: Vec<String> = client.items("/v1/cluster/namespaces").await?;
                print!("{}", format_namespace_list(&namespaces));
            }
            GetResource::Repository { repo } => {
                let (owner, name) = parse_repository_slug(&repo)?;
                print!("{}", format_repository(&client.repository(owner, name).await?));
            }
            GetResource::Branches { repo } => {
                let (owner, name) = parse_repository_slug(&repo)?;
                print!("{}", format_branch_list(&client.branches(owner, name).await?));
            }
        },
        Commands::Delete(args) => {
            let status = client.delete(&args.id).await?;
            println!("{}", status.message);
        }
        Commands::Scale(args) => {
            let record = client.scale(&args.id, args.replicas).await?;
            println!(
                "deployment \"{}\" scaled to {}",
                record.name, record.configuration.replicas
            );
        }
        Commands::Restart(args) => report(client.action(&args.id, "restart").await?, "restarted"),
        Commands::Retry(args) => report(client.action(&args.id, "retry").await?, "retrying"),
        Commands::Cancel(args) => report(client.action(&args.id, "cancel").await?, "cancelled"),
        Commands::Reconcile(args) => {
            let metrics = client.reconcile(&args.id).await?;
            print!("{}", format_metrics(&metrics));
        }
        Commands::Logs(args) => {
            let logs = client.logs(&args.namespace, &args.pod, args.tail).await?;
            print!("{}", logs);
        }
        Commands::Status => {
            let status = client.cluster_status().await?;
            print!("{}", format_cluster_status(&status));
        }
        Commands::Serve(_) | Commands::Context(_) => {}
    }

    Ok(())
}

fn run_context(action: ContextAction, config: &mut Config, path: &Path) -> anyhow::Result<()> {
    match action {
        ContextAction::List => print!("{}", format_context_list(&context_list(config))),
        ContextAction::Current => {
            let (name, url) = context_current(config)?;
            print!("{}", format_current_context(&name, &url));
        }
        ContextAction::Use { name } => {
            context_use(config, &name)?;
            save_config_to(config, path)?;
            println!("Switched to context \"{}\"", name);
        }
        ContextAction::Add {
            name,
            url,
            api_key,
            user_id,
            source_token,
        } => {
            context_add(
                config,
                &name,
                &url,
                api_key.as_deref(),
                user_id.as_deref(),
                source_token.as_deref(),
            )?;
            save_config_to(config, path)?;
            println!("Context \"{}\" added", name);
        }
        ContextAction::Delete { name } => {
            context_delete(config, &name)?;
            save_config_to(config, path)?;
            println!("Context \"{}\" deleted", name);
        }
    }
    Ok(())
}

fn report(record: DeploymentRecord, verb: &str) {
    println!(
        "deployment \"{}\" {} (status {})",
        record.name, verb, record.status
    );
}
