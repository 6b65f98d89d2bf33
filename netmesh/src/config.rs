//! Configuration for mesh runs
//!
//! Two kinds of configuration live here: [`MeshConfig`], the explicit settings handed to
//! one orchestrator instance, and [`Inventory`], a JSON description of the cluster used
//! as a static directory when no Kubernetes API is available.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result};
use netmesh_common::{Interface, DEFAULT_PARALLEL_CLIENTS, DEFAULT_START_PORT};
use serde::{Deserialize, Serialize};

use crate::{error::MeshError, topology::Workload};

/// Settings of one orchestration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    pub workload: Workload,
    /// iperf3 client instances per link, and servers per node
    pub parallel_clients: u16,
    /// First server port on every node
    pub start_port: u16,
    /// Bound on `startServers`/`stopServers`
    pub control_timeout: Duration,
    /// Bound on each `runClient`
    pub client_timeout: Duration,
    /// Settle time between the last link arriving at the barrier and the release
    pub release_delay: Duration,
    /// Attempts for `startServers` on transient failures
    pub server_start_attempts: u32,
    /// Also stop servers on nodes that never acknowledged `startServers`
    pub cleanup: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            workload: Workload::Ring,
            parallel_clients: DEFAULT_PARALLEL_CLIENTS,
            start_port: DEFAULT_START_PORT,
            control_timeout: Duration::from_secs(600),
            client_timeout: Duration::from_secs(60),
            release_delay: Duration::from_secs(1),
            server_start_attempts: 2,
            cleanup: false,
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.parallel_clients == 0 {
            return Err(MeshError::config("parallel clients must be at least 1"));
        }
        if self.server_start_attempts == 0 {
            return Err(MeshError::config("server start attempts must be at least 1"));
        }
        if self.start_port == 0 {
            return Err(MeshError::config("start port must be non-zero"));
        }
        let last_port = u32::from(self.start_port) + u32::from(self.parallel_clients) - 1;
        if last_port > u32::from(u16::MAX) {
            return Err(MeshError::config(format!(
                "port range {}..={last_port} exceeds 65535",
                self.start_port
            )));
        }
        if self.client_timeout.is_zero() || self.control_timeout.is_zero() {
            return Err(MeshError::config("timeouts must be non-zero"));
        }
        Ok(())
    }
}

/// One node entry of an inventory file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryNode {
    /// Node name
    pub name: String,
    /// Agent pod name (defaults to the node name)
    #[serde(default)]
    pub pod: Option<String>,
    /// Agent control endpoint, e.g. `10.0.0.1:3333`
    pub control: SocketAddr,
    /// Primary pod address (defaults to the control endpoint's IP)
    #[serde(default)]
    pub pod_address: Option<IpAddr>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Data-plane interfaces in test order
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    /// Raw CNI network-status annotation, used when `interfaces` is empty
    #[serde(default)]
    pub network_status: Option<String>,
}

impl InventoryNode {
    #[must_use]
    pub fn pod_name(&self) -> &str {
        self.pod.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn primary_address(&self) -> IpAddr {
        self.pod_address.unwrap_or_else(|| self.control.ip())
    }
}

/// A workload pod placed on a node, for workload-derived selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryWorkload {
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub node: String,
}

/// Static description of the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub nodes: Vec<InventoryNode>,
    #[serde(default)]
    pub workloads: Vec<InventoryWorkload>,
}

impl Inventory {
    /// Load an inventory from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read inventory file: {}", path.as_ref().display())
        })?;

        let inventory: Self = serde_json::from_str(&content).with_context(|| {
            format!("Failed to parse inventory file: {}", path.as_ref().display())
        })?;

        inventory.validate()?;

        Ok(inventory)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen_names = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                anyhow::bail!("Node with control endpoint {} has an empty name", node.control);
            }
            if !seen_names.insert(node.name.as_str()) {
                anyhow::bail!("Duplicate node name: {}", node.name);
            }
        }

        let mut seen_controls = HashSet::new();
        for node in &self.nodes {
            if !seen_controls.insert(node.control) {
                anyhow::bail!("Duplicate control endpoint: {}", node.control);
            }
        }

        for workload in &self.workloads {
            if !seen_names.contains(workload.node.as_str()) {
                anyhow::bail!(
                    "Workload in namespace {} is placed on unknown node {}",
                    workload.namespace,
                    workload.node
                );
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn get_node(&self, name: &str) -> Option<&InventoryNode> {
        self.nodes.iter().find(|node| node.name == name)
    }
}
