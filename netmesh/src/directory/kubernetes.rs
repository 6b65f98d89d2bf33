//! Directory backed by the Kubernetes API.
//!
//! Agents are the ready addresses of the health-check service endpoints. Their pods carry
//! the CNI network-status annotation with the data-plane attachments. Node labels and
//! workload placement come from the node and pod lists.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, SocketAddr},
};

use k8s_openapi::api::core::v1::{EndpointAddress, Endpoints, Node as KubeNode, Pod};
use kube::{
    api::{Api, ListParams},
    Client,
};
use log::{debug, info, warn};
use netmesh_common::{Node, DEFAULT_CONTROL_PORT, NETWORK_STATUS_ANNOTATION};

use super::{
    network_status::interfaces_or_fallback, select_names, Directory, NodeMap, NodeSelection,
    WorkloadSelector,
};
use crate::error::DirectoryError;

/// Endpoints object listing the agent pods.
pub const DEFAULT_SERVICE: &str = "autopilot-healthchecks";

/// Label selector of the agent pods.
pub const DEFAULT_AGENT_SELECTOR: &str = "app=autopilot";

/// One ready agent found through the service endpoints
#[derive(Debug)]
struct Agent {
    node: String,
    pod: String,
    address: IpAddr,
}

pub struct KubeDirectory {
    client: Client,
    namespace: String,
    service: String,
    agent_selector: String,
    control_port: u16,
}

impl KubeDirectory {
    /// Connect with the in-cluster or kubeconfig credentials.
    pub async fn connect(namespace: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = Client::try_default()
            .await
            .map_err(|e| DirectoryError::unavailable("failed to create Kubernetes client", e))?;
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            service: DEFAULT_SERVICE.to_string(),
            agent_selector: DEFAULT_AGENT_SELECTOR.to_string(),
            control_port: DEFAULT_CONTROL_PORT,
        }
    }

    #[must_use]
    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    async fn agents(&self) -> Result<Vec<Agent>, DirectoryError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let endpoints = api.get(&self.service).await.map_err(|e| {
            DirectoryError::unavailable(
                format!("failed to read endpoints {}/{}", self.namespace, self.service),
                e,
            )
        })?;

        let agents = ready_agents(
            endpoints
                .subsets
                .unwrap_or_default()
                .into_iter()
                .flat_map(|subset| subset.addresses.unwrap_or_default()),
        );

        debug!("{} ready agent(s) behind {}", agents.len(), self.service);
        Ok(agents)
    }

    /// network-status annotation of every agent pod, keyed by pod name
    async fn agent_annotations(&self) -> Result<BTreeMap<String, String>, DirectoryError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pods = api
            .list(&ListParams::default().labels(&self.agent_selector))
            .await
            .map_err(|e| DirectoryError::unavailable("failed to list agent pods", e))?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name?;
                let annotation = pod
                    .metadata
                    .annotations?
                    .remove(NETWORK_STATUS_ANNOTATION)?;
                Some((name, annotation))
            })
            .collect())
    }

    async fn node_labels(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, DirectoryError> {
        let api: Api<KubeNode> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| DirectoryError::unavailable("failed to list nodes", e))?;

        Ok(nodes
            .items
            .into_iter()
            .filter_map(|node| {
                Some((node.metadata.name?, node.metadata.labels.unwrap_or_default()))
            })
            .collect())
    }

    async fn workload_nodes(
        &self,
        workload: &WorkloadSelector,
    ) -> Result<BTreeSet<String>, DirectoryError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let pods = api
            .list(&ListParams::default().labels(&workload.selector.to_string()))
            .await
            .map_err(|e| {
                DirectoryError::unavailable(format!("failed to list pods of {workload}"), e)
            })?;

        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.spec?.node_name)
            .collect())
    }
}

/// One agent per node, the first ready address winning.
fn ready_agents(addresses: impl IntoIterator<Item = EndpointAddress>) -> Vec<Agent> {
    let mut agents: Vec<Agent> = Vec::new();
    for address in addresses {
        let Some(node) = address.node_name else {
            warn!("Endpoint address {} has no node name, skipping", address.ip);
            continue;
        };
        let ip: IpAddr = match address.ip.parse() {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Endpoint address {:?} on {node} is invalid: {e}", address.ip);
                continue;
            }
        };
        if let Some(first) = agents.iter().find(|a| a.node == node) {
            warn!(
                "Second agent {ip} on {node} ignored, keeping {} ({})",
                first.address, first.pod
            );
            continue;
        }
        let pod = address
            .target_ref
            .and_then(|r| r.name)
            .unwrap_or_else(|| node.clone());
        agents.push(Agent {
            node,
            pod,
            address: ip,
        });
    }
    agents
}

impl Directory for KubeDirectory {
    async fn resolve(&self, selection: &NodeSelection) -> Result<NodeMap, DirectoryError> {
        let agents = self.agents().await?;

        let labels = if selection.labels.is_empty() {
            BTreeMap::new()
        } else {
            self.node_labels().await?
        };

        let mut placements = Vec::with_capacity(selection.workloads.len());
        for workload in &selection.workloads {
            placements.push(self.workload_nodes(workload).await?);
        }

        let names = select_names(
            selection,
            agents.iter().map(|a| a.node.as_str()),
            |name| labels.get(name),
            |workload| {
                let index = selection
                    .workloads
                    .iter()
                    .position(|w| w == workload)
                    .unwrap_or_default();
                Ok(placements.get(index).cloned().unwrap_or_default())
            },
        )?;

        let annotations = self.agent_annotations().await?;

        let nodes: NodeMap = agents
            .into_iter()
            .filter(|agent| names.contains(&agent.node))
            .map(|agent| {
                let interfaces = interfaces_or_fallback(
                    &agent.node,
                    annotations.get(&agent.pod).map(String::as_str),
                    agent.address,
                );
                let control = SocketAddr::new(agent.address, self.control_port);
                (
                    agent.node.clone(),
                    Node::new(agent.node, agent.pod, control, interfaces),
                )
            })
            .collect();

        if nodes.is_empty() {
            return Err(DirectoryError::empty(selection));
        }
        info!(
            "Resolved {} node(s) for {selection} in namespace {}",
            nodes.len(),
            self.namespace
        );

        Ok(nodes)
    }
}
