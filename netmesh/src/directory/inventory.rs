use std::collections::BTreeSet;

use log::{debug, info};
use netmesh_common::Node;

use super::{
    network_status::interfaces_or_fallback, select_names, Directory, NodeMap, NodeSelection,
};
use crate::{
    config::{Inventory, InventoryNode},
    error::DirectoryError,
};

/// Directory backed by a static [`Inventory`].
#[derive(Debug, Clone)]
pub struct InventoryDirectory {
    inventory: Inventory,
}

impl InventoryDirectory {
    pub fn new(inventory: Inventory) -> Self {
        Self { inventory }
    }

    fn to_node(entry: &InventoryNode) -> Node {
        // explicit list, then the CNI annotation, then the primary address
        let interfaces = if entry.interfaces.is_empty() {
            interfaces_or_fallback(
                &entry.name,
                entry.network_status.as_deref(),
                entry.primary_address(),
            )
        } else {
            entry.interfaces.clone()
        };

        Node::new(
            entry.name.clone(),
            entry.pod_name(),
            entry.control,
            interfaces,
        )
    }

    fn workload_nodes(&self, workload: &super::WorkloadSelector) -> BTreeSet<String> {
        self.inventory
            .workloads
            .iter()
            .filter(|w| w.namespace == workload.namespace && workload.selector.matches(&w.labels))
            .map(|w| w.node.clone())
            .collect()
    }
}

impl Directory for InventoryDirectory {
    async fn resolve(&self, selection: &NodeSelection) -> Result<NodeMap, DirectoryError> {
        let names = select_names(
            selection,
            self.inventory.nodes.iter().map(|n| n.name.as_str()),
            |name| self.inventory.get_node(name).map(|n| &n.labels),
            |workload| Ok(self.workload_nodes(workload)),
        )?;

        let nodes: NodeMap = names
            .iter()
            .filter_map(|name| self.inventory.get_node(name))
            .map(|entry| (entry.name.clone(), Self::to_node(entry)))
            .collect();

        if nodes.is_empty() {
            return Err(DirectoryError::empty(selection));
        }

        for node in nodes.values() {
            debug!(
                "{} at {} with {} interface(s)",
                node.display_name(),
                node.control,
                node.interfaces.len()
            );
        }
        info!("Resolved {} node(s) for {selection}", nodes.len());

        Ok(nodes)
    }
}
