//! Command implementations

use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
#[cfg(feature = "kubernetes")]
use netmesh::directory::kubernetes::KubeDirectory;
use netmesh::{
    Directory, DirectoryError, HttpAgentClient, Inventory, InventoryDirectory, MeshConfig,
    MeshError, MeshOrchestrator, MeshReport, NodeMap, NodeSelection, Workload,
};
use tokio::sync::watch;

use crate::cli::{RunArgs, TargetArgs};

/// The directory chosen on the command line
pub enum NodeDirectory {
    Inventory(InventoryDirectory),
    #[cfg(feature = "kubernetes")]
    Kubernetes(KubeDirectory),
}

impl NodeDirectory {
    /// Inventory file if given, the Kubernetes API otherwise.
    pub async fn from_args(args: &TargetArgs) -> Result<Self> {
        if let Some(path) = &args.inventory {
            let inventory = Inventory::load_from_file(path)?;
            info!(
                "Loaded inventory {} with {} node(s)",
                path.display(),
                inventory.nodes.len()
            );
            return Ok(Self::Inventory(InventoryDirectory::new(inventory)));
        }

        #[cfg(feature = "kubernetes")]
        {
            let directory = KubeDirectory::connect(args.namespace.clone())
                .await?
                .with_control_port(args.control_port);
            Ok(Self::Kubernetes(directory))
        }

        #[cfg(not(feature = "kubernetes"))]
        {
            bail!(
                "No node directory: pass --inventory FILE (Kubernetes discovery in namespace {} \
                 needs the `kubernetes` feature)",
                args.namespace
            )
        }
    }
}

impl Directory for NodeDirectory {
    async fn resolve(&self, selection: &NodeSelection) -> Result<NodeMap, DirectoryError> {
        match self {
            Self::Inventory(directory) => directory.resolve(selection).await,
            #[cfg(feature = "kubernetes")]
            Self::Kubernetes(directory) => directory.resolve(selection).await,
        }
    }
}

fn selection(args: &TargetArgs) -> Result<NodeSelection> {
    NodeSelection::from_args(&args.nodes, args.labels.as_deref(), args.job.as_deref())
        .map_err(|e| MeshError::from(e).into())
}

fn mesh_config(args: &RunArgs) -> Result<MeshConfig> {
    let workload: Workload = args.workload.parse()?;
    let config = MeshConfig {
        workload,
        parallel_clients: args.pclients,
        start_port: args.startport,
        control_timeout: Duration::from_secs(args.control_timeout),
        client_timeout: Duration::from_secs(args.client_timeout),
        release_delay: Duration::from_millis(args.release_delay_ms),
        server_start_attempts: args.start_attempts,
        cleanup: args.cleanup,
    };
    config.validate()?;
    Ok(config)
}

/// Run a mesh test and print its report.
///
/// Returns [`MeshError::Interrupted`] after printing the partial report when `shutdown`
/// fired mid-run.
pub async fn run(args: &RunArgs, shutdown: watch::Receiver<bool>) -> Result<MeshReport> {
    let config = mesh_config(args)?;
    let selection = selection(&args.target)?;
    let directory = NodeDirectory::from_args(&args.target).await?;

    let agent = HttpAgentClient::new(config.control_timeout, config.client_timeout)?;
    let orchestrator = MeshOrchestrator::new(agent, config.clone())?.with_shutdown(shutdown);

    let run = orchestrator.execute(&directory, &selection).await?;
    let report = MeshReport::new(&config, run);

    println!("{report}");
    if let Some(path) = &args.output {
        report
            .save(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if report.run.interrupted {
        return Err(MeshError::Interrupted {
            completed_rounds: report.run.completed_rounds,
        }
        .into());
    }
    Ok(report)
}

/// Print the schedule the ring workload would run over the selected nodes.
pub async fn plan(args: &TargetArgs) -> Result<()> {
    let selection = selection(args)?;
    let directory = NodeDirectory::from_args(args).await?;
    let nodes = directory.resolve(&selection).await?;

    println!("Nodes:");
    for node in nodes.values() {
        let interfaces: Vec<String> = node
            .interfaces
            .iter()
            .map(|i| format!("{}={}", i.name, i.address))
            .collect();
        println!(
            "    {} ({} at {}): {}",
            node.name,
            node.pod,
            node.control,
            interfaces.join(", ")
        );
    }

    let order: Vec<&str> = nodes.keys().map(String::as_str).collect();
    let schedule = Workload::Ring.schedule(&order);
    let interface_count = nodes.values().map(|n| n.interfaces.len()).max().unwrap_or(0);
    println!();
    println!(
        "{} round(s) x {interface_count} interface(s), {} link(s) per interface",
        schedule.len(),
        schedule.pair_count()
    );
    print!("{schedule}");
    Ok(())
}

/// Stop servers on every selected node.
pub async fn stop(args: &TargetArgs) -> Result<()> {
    let selection = selection(args)?;
    let directory = NodeDirectory::from_args(args).await?;
    let nodes = directory.resolve(&selection).await?;

    let config = MeshConfig::default();
    let agent = HttpAgentClient::new(config.control_timeout, config.client_timeout)?;
    let orchestrator = MeshOrchestrator::new(agent, config)?;

    let failures = orchestrator.stop_all(nodes.values().collect()).await;
    if failures.is_empty() {
        info!("Stopped servers on {} node(s)", nodes.len());
        return Ok(());
    }
    for (node, error) in &failures {
        warn!("{node}: {error}");
    }
    bail!(
        "Failed to stop servers on {} of {} node(s)",
        failures.len(),
        nodes.len()
    )
}
