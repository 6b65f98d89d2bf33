//! Control requests to the per-node agents
//!
//! Each agent exposes three idempotent-ish operations: start a batch of iperf3 servers,
//! run iperf3 clients from its node toward a destination, and stop its servers. A
//! [`RemoteAgent`] issues them and classifies every failure into an [`AgentError`]. It
//! never retries on its own; retry policy belongs to the orchestrator.

mod http;

use std::{future::Future, net::IpAddr};

pub use http::HttpAgentClient;
use netmesh_common::{ClientTestResult, Node};
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Acknowledgement of a server start or stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Agent-provided text, kept for logs
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Client side of the agent control protocol
pub trait RemoteAgent {
    /// Ask `node` to run `server_count` iperf3 servers on consecutive ports from
    /// `start_port`.
    fn start_servers(
        &self,
        node: &Node,
        server_count: u16,
        start_port: u16,
    ) -> impl Future<Output = Result<Ack, AgentError>> + Send;

    /// Run `client_count` iperf3 clients from `source` to `destination`, the i-th client
    /// connecting to `port + i`. Returns once every client has finished.
    fn run_client(
        &self,
        source: &Node,
        destination: IpAddr,
        port: u16,
        client_count: u16,
    ) -> impl Future<Output = Result<ClientTestResult, AgentError>> + Send;

    /// Stop every iperf3 server on `node`.
    fn stop_servers(&self, node: &Node) -> impl Future<Output = Result<Ack, AgentError>> + Send;
}
