//! HTTP transport for the agent control protocol
//!
//! Every operation is a plain `GET` on the agent's control endpoint with query parameters:
//!
//! | operation     | path                 | query                                  |
//! |---------------|----------------------|----------------------------------------|
//! | start servers | `/iperfservers`      | `numservers`, `startport`              |
//! | run clients   | `/iperfclients`      | `dstip`, `dstport`, `numclients`       |
//! | stop servers  | `/iperfstopservers`  |                                        |

use std::{net::IpAddr, time::Duration};

use anyhow::Context;
use log::{debug, trace};
use netmesh_common::{
    ClientStatsReply, ClientTestResult, Node, RUN_CLIENTS_PATH, START_SERVERS_PATH,
    STOP_SERVERS_PATH,
};

use super::{Ack, RemoteAgent};
use crate::error::{AgentError, AgentOperation};

/// Longest body excerpt carried in an error message
const EXCERPT_LEN: usize = 200;

/// [`RemoteAgent`] talking HTTP to the node agents.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
    control_timeout: Duration,
    client_timeout: Duration,
}

impl HttpAgentClient {
    /// Creates a client with per-request bounds
    ///
    /// # Arguments
    ///
    /// * `control_timeout` - Bound on server start and stop requests
    /// * `client_timeout` - Bound on a client test request, including the test itself
    pub fn new(control_timeout: Duration, client_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            // agents drop idle connections between rounds
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            control_timeout,
            client_timeout,
        })
    }

    /// Issues one request and returns the body of a 2xx response
    async fn get(
        &self,
        node: &Node,
        operation: AgentOperation,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<String, AgentError> {
        let url = format!("http://{}{path}", node.control);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        debug!("{operation} on {}: GET {url} {query:?}", node.name);

        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::timeout(&node.name, operation, timeout_ms)
                } else if e.is_connect() {
                    AgentError::unreachable(&node.name, operation, error_chain(&e))
                } else {
                    AgentError::disconnected(&node.name, operation, error_chain(&e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::timeout(&node.name, operation, timeout_ms)
            } else {
                AgentError::disconnected(&node.name, operation, error_chain(&e))
            }
        })?;
        trace!("{operation} on {}: HTTP {status}: {body}", node.name);

        if !status.is_success() {
            return Err(AgentError::malformed(
                &node.name,
                operation,
                format!("HTTP {status}: {}", excerpt(&body)),
            ));
        }

        Ok(body)
    }
}

impl RemoteAgent for HttpAgentClient {
    async fn start_servers(
        &self,
        node: &Node,
        server_count: u16,
        start_port: u16,
    ) -> Result<Ack, AgentError> {
        let body = self
            .get(
                node,
                AgentOperation::StartServers,
                START_SERVERS_PATH,
                &[
                    ("numservers", server_count.to_string()),
                    ("startport", start_port.to_string()),
                ],
                self.control_timeout,
            )
            .await?;
        Ok(Ack::new(body.trim()))
    }

    async fn run_client(
        &self,
        source: &Node,
        destination: IpAddr,
        port: u16,
        client_count: u16,
    ) -> Result<ClientTestResult, AgentError> {
        let body = self
            .get(
                source,
                AgentOperation::RunClient,
                RUN_CLIENTS_PATH,
                &[
                    ("dstip", destination.to_string()),
                    ("dstport", port.to_string()),
                    ("numclients", client_count.to_string()),
                ],
                self.client_timeout,
            )
            .await?;

        let stats = ClientStatsReply::from_body(&body).map_err(|e| {
            AgentError::malformed(
                &source.name,
                AgentOperation::RunClient,
                format!("{e}: {}", excerpt(&body)),
            )
        })?;

        Ok(ClientTestResult::from_reply(destination, port, stats))
    }

    async fn stop_servers(&self, node: &Node) -> Result<Ack, AgentError> {
        let body = self
            .get(
                node,
                AgentOperation::StopServers,
                STOP_SERVERS_PATH,
                &[],
                self.control_timeout,
            )
            .await?;
        Ok(Ack::new(body.trim()))
    }
}

fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(EXCERPT_LEN) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}
