//! Mesh run state machine
//!
//! ```text
//! Idle -> ServersStarting -> ServersReady -> RoundRunning(i, r) ... -> ServersStopping -> Done
//!   \-> Aborted
//! ```
//!
//! Only resolution failures abort, and only from `Idle`. Once `startServers` has been
//! sent anywhere the run always passes through `ServersStopping`, whatever happened to the
//! rounds in between. Per-node and per-link failures become data in [`MeshRun`].
//!
//! All concurrency is cooperative within the calling task: the requests of a stage are
//! futures joined together, never spawned.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    net::IpAddr,
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use netmesh_common::{LinkKey, LinkMeasurement, LinkStatus, Node, SkipReason, SkippedLink};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};

use crate::{
    agent::{Ack, RemoteAgent},
    barrier::ReleaseGate,
    config::MeshConfig,
    directory::{Directory, NodeMap, NodeSelection},
    error::{AgentError, AgentOperation, DirectoryError, MeshError, Result},
    stats::format_rate,
    topology::{Round, RoundSchedule},
};

/// Pause between `startServers` attempts
const START_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Orchestrator states, in the order a run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum MeshState {
    Idle,
    ServersStarting,
    ServersReady,
    RoundRunning { interface: usize, round: usize },
    ServersStopping,
    Done,
    Aborted,
}

impl fmt::Display for MeshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::ServersStarting => f.write_str("ServersStarting"),
            Self::ServersReady => f.write_str("ServersReady"),
            Self::RoundRunning { interface, round } => {
                write!(f, "RoundRunning(interface {interface}, round {round})")
            }
            Self::ServersStopping => f.write_str("ServersStopping"),
            Self::Done => f.write_str("Done"),
            Self::Aborted => f.write_str("Aborted"),
        }
    }
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshRun {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Participants in schedule order
    pub nodes: Vec<Node>,
    /// Number of interface passes (largest interface count of any node)
    pub interface_count: usize,
    pub schedule: RoundSchedule,
    /// Nodes that never acknowledged `startServers`, with the last error
    pub serverless: BTreeMap<String, String>,
    /// `stopServers` failures, logged and otherwise ignored
    pub stop_failures: BTreeMap<String, String>,
    pub measurements: Vec<LinkMeasurement>,
    pub skipped: Vec<SkippedLink>,
    /// Rounds fully resolved, over all interfaces
    pub completed_rounds: usize,
    /// Stopped early on a shutdown request
    pub interrupted: bool,
    /// Visited states, in order
    pub states: Vec<MeshState>,
}

impl MeshRun {
    #[must_use]
    pub fn node_order(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Rounds the full schedule has over all interfaces.
    #[must_use]
    pub fn planned_rounds(&self) -> usize {
        self.schedule.len() * self.interface_count
    }

    #[must_use]
    pub fn final_state(&self) -> Option<MeshState> {
        self.states.last().copied()
    }

    #[must_use]
    pub fn failed_links(&self) -> usize {
        self.measurements.iter().filter(|m| !m.is_success()).count()
    }
}

/// A link ready to be run
struct PlannedLink<'a> {
    key: LinkKey,
    source: &'a Node,
    address: IpAddr,
}

/// Drives mesh runs against a [`RemoteAgent`].
pub struct MeshOrchestrator<A> {
    agent: A,
    config: MeshConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<A: RemoteAgent> MeshOrchestrator<A> {
    /// Create an orchestrator, rejecting invalid settings before anything is sent.
    pub fn new(agent: A, config: MeshConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            agent,
            config,
            shutdown: None,
        })
    }

    /// Stop scheduling rounds once `shutdown` reads `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Schedule the configured workload would run over `nodes`.
    pub fn plan(&self, nodes: &NodeMap) -> RoundSchedule {
        let order: Vec<&str> = nodes.keys().map(String::as_str).collect();
        self.config.workload.schedule(&order)
    }

    /// Resolve `selection` and run the mesh over it.
    pub async fn execute<D: Directory>(
        &self,
        directory: &D,
        selection: &NodeSelection,
    ) -> Result<MeshRun> {
        debug!("State: {} (resolving {selection})", MeshState::Idle);
        let nodes = directory.resolve(selection).await.map_err(|e| {
            warn!("State: {}: {e}", MeshState::Aborted);
            MeshError::from(e)
        })?;
        self.run(&nodes).await
    }

    /// Run the full schedule over already resolved nodes.
    pub async fn run(&self, nodes: &NodeMap) -> Result<MeshRun> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut states = vec![MeshState::Idle];

        if nodes.is_empty() {
            warn!("State: {}: no nodes to test", MeshState::Aborted);
            return Err(DirectoryError::empty("resolved node set").into());
        }

        let schedule = self.plan(nodes);
        let interface_count = nodes.values().map(|n| n.interfaces.len()).max().unwrap_or(0);
        let mut run = MeshRun {
            started_at,
            duration_ms: 0,
            nodes: nodes.values().cloned().collect(),
            interface_count,
            schedule,
            serverless: BTreeMap::new(),
            stop_failures: BTreeMap::new(),
            measurements: Vec::new(),
            skipped: Vec::new(),
            completed_rounds: 0,
            interrupted: false,
            states: Vec::new(),
        };

        if run.schedule.is_empty() {
            warn!("Only {} node(s) selected, nothing to test", nodes.len());
            states.push(MeshState::Done);
            run.states = states;
            run.duration_ms = elapsed_ms(clock);
            return Ok(run);
        }

        info!(
            "Mesh test ({}) over {} node(s), {} interface(s), {} round(s) each",
            self.config.workload,
            nodes.len(),
            interface_count,
            run.schedule.len()
        );

        self.transition(&mut states, MeshState::ServersStarting);
        let started = self.start_all(nodes, &mut run.serverless).await;
        self.transition(&mut states, MeshState::ServersReady);

        'interfaces: for interface in 0..interface_count {
            for node in nodes.values().filter(|n| n.interface(interface).is_none()) {
                warn!(
                    "{} has {} interface(s), skipping its links on interface {interface}",
                    node.name,
                    node.interfaces.len()
                );
            }

            for round in run.schedule.rounds() {
                if self.shutdown_requested() {
                    warn!(
                        "Shutdown requested, stopping after {} round(s)",
                        run.completed_rounds
                    );
                    run.interrupted = true;
                    break 'interfaces;
                }

                self.transition(
                    &mut states,
                    MeshState::RoundRunning {
                        interface,
                        round: round.number,
                    },
                );
                let (measurements, skipped) =
                    self.run_round(nodes, &started, interface, round).await;
                run.measurements.extend(measurements);
                run.skipped.extend(skipped);
                run.completed_rounds += 1;
            }
        }

        self.transition(&mut states, MeshState::ServersStopping);
        let mut targets: Vec<&Node> = nodes
            .values()
            .filter(|n| started.contains(&n.name))
            .collect();
        if self.config.cleanup {
            targets.extend(nodes.values().filter(|n| !started.contains(&n.name)));
        }
        run.stop_failures = self.stop_all(targets).await;
        self.transition(&mut states, MeshState::Done);

        run.states = states;
        run.duration_ms = elapsed_ms(clock);
        info!(
            "Mesh test finished in {:.1}s: {} link(s), {} failed, {} skipped",
            run.duration_ms as f64 / 1000.0,
            run.measurements.len(),
            run.failed_links(),
            run.skipped.len()
        );
        Ok(run)
    }

    /// Send `stopServers` to `nodes`, returning the failures.
    pub async fn stop_all(&self, nodes: Vec<&Node>) -> BTreeMap<String, String> {
        let results = join_all(nodes.into_iter().map(|node| async move {
            let result = bounded(
                node,
                AgentOperation::StopServers,
                self.config.control_timeout,
                self.agent.stop_servers(node),
            )
            .await;
            (node, result)
        }))
        .await;

        let mut failures = BTreeMap::new();
        for (node, result) in results {
            match result {
                Ok(ack) => info!("Stopped servers on {}: {}", node.display_name(), ack.message),
                Err(e) => {
                    warn!("Failed to stop servers on {}: {e}", node.display_name());
                    failures.insert(node.name.clone(), e.to_string());
                }
            }
        }
        failures
    }

    fn transition(&self, states: &mut Vec<MeshState>, next: MeshState) {
        debug!(
            "State: {} -> {next}",
            states.last().copied().unwrap_or(MeshState::Idle)
        );
        states.push(next);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Start servers everywhere; returns the nodes that acknowledged.
    async fn start_all(
        &self,
        nodes: &NodeMap,
        serverless: &mut BTreeMap<String, String>,
    ) -> BTreeSet<String> {
        let results = join_all(
            nodes
                .values()
                .map(|node| async move { (node, self.start_with_retry(node).await) }),
        )
        .await;

        let mut started = BTreeSet::new();
        for (node, result) in results {
            match result {
                Ok(ack) => {
                    info!("Servers up on {}: {}", node.display_name(), ack.message);
                    started.insert(node.name.clone());
                }
                Err(e) => {
                    warn!(
                        "{} has no servers and will not be tested as a destination: {e}",
                        node.display_name()
                    );
                    serverless.insert(node.name.clone(), e.to_string());
                }
            }
        }
        started
    }

    async fn start_with_retry(&self, node: &Node) -> std::result::Result<Ack, AgentError> {
        let attempts = self.config.server_start_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = bounded(
                node,
                AgentOperation::StartServers,
                self.config.control_timeout,
                self.agent.start_servers(
                    node,
                    self.config.parallel_clients,
                    self.config.start_port,
                ),
            )
            .await;

            match result {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!("Attempt {attempt}/{attempts}: {e}, retrying");
                    attempt += 1;
                    tokio::time::sleep(START_RETRY_BACKOFF).await;
                }
                other => return other,
            }
        }
    }

    async fn run_round(
        &self,
        nodes: &NodeMap,
        started: &BTreeSet<String>,
        interface: usize,
        round: &Round,
    ) -> (Vec<LinkMeasurement>, Vec<SkippedLink>) {
        let mut planned = Vec::with_capacity(round.pairs.len());
        let mut skipped = Vec::new();

        for pair in &round.pairs {
            let (Some(source), Some(destination)) =
                (nodes.get(&pair.source), nodes.get(&pair.destination))
            else {
                continue;
            };

            let skip = |reason| SkippedLink {
                source: source.name.clone(),
                destination: destination.name.clone(),
                interface,
                round: round.number,
                reason,
            };

            if !started.contains(&destination.name) {
                skipped.push(skip(SkipReason::ServerlessDestination));
                continue;
            }
            if source.interface(interface).is_none() {
                skipped.push(skip(SkipReason::MissingInterface {
                    node: source.name.clone(),
                }));
                continue;
            }
            let Some(target) = destination.interface(interface) else {
                skipped.push(skip(SkipReason::MissingInterface {
                    node: destination.name.clone(),
                }));
                continue;
            };

            planned.push(PlannedLink {
                key: LinkKey {
                    source: source.name.clone(),
                    destination: destination.name.clone(),
                    interface,
                    interface_name: target.name.clone(),
                    round: round.number,
                },
                source,
                address: target.address,
            });
        }

        info!(
            "Round {} on interface {interface}: {} link(s), {} skipped",
            round.number,
            planned.len(),
            skipped.len()
        );

        let gate = ReleaseGate::new(planned.len(), self.config.release_delay);
        let measurements =
            join_all(planned.into_iter().map(|link| self.run_link(&gate, link))).await;

        (measurements, skipped)
    }

    async fn run_link(&self, gate: &ReleaseGate, link: PlannedLink<'_>) -> LinkMeasurement {
        gate.arrive().await;

        let released = Instant::now();
        let result = bounded(
            link.source,
            AgentOperation::RunClient,
            self.config.client_timeout,
            self.agent.run_client(
                link.source,
                link.address,
                self.config.start_port,
                self.config.parallel_clients,
            ),
        )
        .await;
        let elapsed = elapsed_ms(released);

        match result {
            Ok(result) => {
                debug!(
                    "{} -> {} ({}): {}",
                    link.key.source,
                    link.key.destination,
                    link.key.interface_name,
                    format_rate(result.receiver.bits_per_sec())
                );
                LinkMeasurement::success(
                    link.key,
                    link.address,
                    result.sender,
                    result.receiver,
                    elapsed,
                )
            }
            Err(e) => {
                warn!(
                    "{} -> {} ({}) failed: {e}",
                    link.key.source, link.key.destination, link.key.interface_name
                );
                let status = if e.is_timeout() {
                    LinkStatus::Timeout
                } else {
                    LinkStatus::TransportError
                };
                LinkMeasurement::failed(link.key, link.address, status, e.to_string(), elapsed)
            }
        }
    }
}

/// Bound an agent call, mapping expiry to [`AgentError::Timeout`].
async fn bounded<T, F>(
    node: &Node,
    operation: AgentOperation,
    limit: Duration,
    call: F,
) -> std::result::Result<T, AgentError>
where
    F: Future<Output = std::result::Result<T, AgentError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::timeout(
            &node.name,
            operation,
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
