//! Cluster members as seen by one orchestration run.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::FALLBACK_INTERFACE_NAME;

/// One data-plane network attachment of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Logical name, e.g. `net1-0`
    pub name: String,
    /// Address other nodes reach this attachment on
    pub address: IpAddr,
}

impl Interface {
    pub fn new(name: impl Into<String>, address: IpAddr) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

/// A cluster node taking part in a mesh test.
///
/// Nodes are built by the directory at the start of a run and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique, stable node name
    pub name: String,
    /// Name of the agent pod serving this node
    pub pod: String,
    /// Address of the agent's control server
    pub control: SocketAddr,
    /// Ordered data-plane interfaces
    pub interfaces: Vec<Interface>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        pod: impl Into<String>,
        control: SocketAddr,
        interfaces: Vec<Interface>,
    ) -> Self {
        Self {
            name: name.into(),
            pod: pod.into(),
            control,
            interfaces,
        }
    }

    /// Node reachable only through its primary pod address.
    pub fn single_homed(
        name: impl Into<String>,
        pod: impl Into<String>,
        control: SocketAddr,
        address: IpAddr,
    ) -> Self {
        Self::new(
            name,
            pod,
            control,
            vec![Interface::new(FALLBACK_INTERFACE_NAME, address)],
        )
    }

    /// Interface at `index`, if this node has that many.
    #[must_use]
    pub fn interface(&self, index: usize) -> Option<&Interface> {
        self.interfaces.get(index)
    }

    /// `pod_on_node` label used in logs.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}_on_{}", self.pod, self.name)
    }
}
