use anyhow::{Context, Result};
use node_admin::cli::{Args, ConfigDiscovery, EtcHostsConfig, ExecConfig, ExecutionMode, Target};
use node_admin::container::ContainerRuntimeClient;
use node_admin::identity::{Credential, IdentityTlsConnector};
use node_admin::maintenance::{CoreDumpReporter, FeedReporter, disk_used_in_bytes};
use node_admin::{NodeAdminConfig, NodeSpec, PathResolver, StorageMaintainer};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let ExecutionMode::ShowConfig = mode {
        print!("{}", ConfigDiscovery::discovery_info(args.config.as_deref())?);
        return Ok(());
    }

    let config = Arc::new(NodeAdminConfig::discover(args.config.as_deref())?);
    debug!("Effective configuration: {:?}", config);

    match mode {
        ExecutionMode::DiskUsage(path) => {
            let used = tokio::task::spawn_blocking(move || disk_used_in_bytes(&path)).await??;
            println!("{}", used);
        }
        ExecutionMode::Translate { target, path } => {
            let resolver = PathResolver::new(&config.paths);
            println!(
                "agent: {}",
                resolver
                    .path_in_agent_from_path_in_node(&target.container, &path)?
                    .display()
            );
            println!(
                "host:  {}",
                resolver
                    .path_in_host_from_path_in_node(&target.container, &path)?
                    .display()
            );
        }
        ExecutionMode::CleanFiles(target) => {
            let maintainer = maintainer(&config).await?;
            if maintainer.remove_old_files_from_node(&target.container).await? {
                println!("Removed old files from {}", target.container);
            } else {
                println!("File cleanup of {} is throttled", target.container);
            }
        }
        ExecutionMode::CoreDumps(target) => {
            let node = node_spec(&target)?;
            let maintainer = maintainer(&config).await?;
            let entries = maintainer
                .handle_core_dumps_for_container(&target.container, &node)
                .await?;
            for entry in &entries {
                println!(
                    "{}\t{:?}\t{}\t{}",
                    entry.id(),
                    entry.state(),
                    entry.file_name(),
                    entry.location().display()
                );
            }
            info!("Handled {} core dumps of {}", entries.len(), target.container);
        }
        ExecutionMode::CleanupStorage(target) => {
            let node = node_spec(&target)?;
            let maintainer = maintainer(&config).await?;
            match maintainer.cleanup_node_storage(&target.container, &node).await? {
                Some(archived) => println!("{}", archived.display()),
                None => println!("No storage found for {}", target.container),
            }
        }
        ExecutionMode::EtcHosts(EtcHostsConfig { target, ipv6, ipv4 }) => {
            let runtime = runtime(&config).await?;
            let data = runtime.container_data(&target.container);
            let content = runtime
                .generate_etc_hosts(&data, &target.hostname, ipv4, ipv6)
                .await?;
            print!("{}", content);
        }
        ExecutionMode::Exec(ExecConfig {
            target,
            network_namespace,
            command,
        }) => {
            let runtime = runtime(&config).await?;
            let result = if network_namespace {
                runtime
                    .execute_in_network_namespace(&target.container, command.as_slice())
                    .await?
            } else {
                runtime
                    .execute_in_container(&target.container, command.as_slice())
                    .await?
            };
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
        }
        ExecutionMode::ShowConfig => unreachable!("handled before loading configuration"),
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("node_admin=info"));
    if verbose {
        if let Ok(directive) = "node_admin=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "containers")]
async fn runtime(config: &Arc<NodeAdminConfig>) -> Result<ContainerRuntimeClient> {
    let engine = Arc::new(node_admin::container::DockerEngine::new().await?);
    let executor = Arc::new(node_admin::executor::HostExecutor::with_default_timeout(config.command_timeout));
    Ok(ContainerRuntimeClient::new(engine, executor, config.clone()))
}

#[cfg(not(feature = "containers"))]
async fn runtime(_config: &Arc<NodeAdminConfig>) -> Result<ContainerRuntimeClient> {
    anyhow::bail!("node-admin was built without container engine support (feature `containers`)")
}

async fn maintainer(config: &Arc<NodeAdminConfig>) -> Result<StorageMaintainer> {
    let maintainer = StorageMaintainer::new(runtime(config).await?, config);
    Ok(match reporter(config).await? {
        Some(reporter) => maintainer.with_reporter(reporter),
        None => maintainer,
    })
}

async fn reporter(config: &NodeAdminConfig) -> Result<Option<Arc<dyn CoreDumpReporter>>> {
    let Some(endpoint) = &config.coredump_feed_endpoint else {
        return Ok(None);
    };

    let mut reporter = FeedReporter::new(endpoint.clone()).with_timeout(config.command_timeout);
    if let Some(identity) = &config.identity {
        let credential = Credential::load(identity)
            .await
            .context("Failed to load service identity")?;
        info!(
            "Reporting core dumps as {}",
            credential
                .identity()
                .map(ToString::to_string)
                .unwrap_or_default()
        );
        reporter = reporter.with_identity(Arc::new(IdentityTlsConnector::new(credential)));
    }
    Ok(Some(Arc::new(reporter)))
}

fn node_spec(target: &Target) -> Result<NodeSpec> {
    match &target.node_spec {
        Some(path) => {
            let content = std::fs::read(path)
                .with_context(|| format!("Failed to read node specification {}", path.display()))?;
            serde_json::from_slice(&content)
                .with_context(|| format!("Invalid node specification {}", path.display()))
        }
        None => Ok(NodeSpec::builder(target.hostname.as_str()).build()),
    }
}
