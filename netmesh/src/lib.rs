//! Ring-topology iperf3 mesh testing across cluster nodes.
//!
//! A run resolves the participating nodes through a [`Directory`], starts iperf3 servers
//! on all of them through their [`RemoteAgent`], then walks a round schedule once per
//! data-plane interface. The links of a round start together behind a release gate and
//! the next round only begins once all of them resolved. Per-link results are reduced
//! into an [`AggregateReport`].
//!
//! ```rust,no_run
//! use netmesh::{
//!     Inventory, InventoryDirectory, HttpAgentClient, MeshConfig, MeshOrchestrator,
//!     MeshReport, NodeSelection,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MeshConfig::default();
//! let directory = InventoryDirectory::new(Inventory::load_from_file("inventory.json")?);
//! let agent = HttpAgentClient::new(config.control_timeout, config.client_timeout)?;
//! let orchestrator = MeshOrchestrator::new(agent, config.clone())?;
//!
//! let run = orchestrator.execute(&directory, &NodeSelection::all()).await?;
//! println!("{}", MeshReport::new(&config, run));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod aggregate;
pub mod barrier;
pub mod config;
pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod stats;
pub mod topology;

pub use agent::{Ack, HttpAgentClient, RemoteAgent};
pub use aggregate::{aggregate, AggregateReport, ThroughputMatrix, ThroughputSummary};
pub use barrier::ReleaseGate;
pub use config::{Inventory, InventoryNode, InventoryWorkload, MeshConfig};
pub use directory::{
    Directory, InventoryDirectory, LabelSelector, NodeMap, NodeSelection, WorkloadSelector,
};
pub use error::{AgentError, AgentOperation, DirectoryError, MeshError, Result};
pub use orchestrator::{MeshOrchestrator, MeshRun, MeshState};
pub use report::MeshReport;
pub use topology::{ring, Pair, Round, RoundSchedule, Workload};
