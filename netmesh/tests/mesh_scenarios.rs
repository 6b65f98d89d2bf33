//! End-to-end runs of the orchestrator against a scripted agent.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use netmesh::{
    Ack, AgentError, AgentOperation, AggregateReport, Directory, Inventory, InventoryDirectory,
    MeshConfig, MeshOrchestrator, MeshReport, MeshState, NodeMap, NodeSelection, RemoteAgent,
};
use netmesh_common::{
    ClientStatsReply, ClientTestResult, Interface, LinkStatus, Node, SkipReason,
};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Call {
    operation: AgentOperation,
    node: String,
    destination: Option<IpAddr>,
    started: Instant,
    finished: Option<Instant>,
}

#[derive(Default)]
struct Script {
    /// Nodes whose control endpoint refuses connections
    unreachable: BTreeSet<String>,
    /// How long a client test from a source takes
    client_delay: BTreeMap<String, Duration>,
    /// Receiver bitrate reported by a source, Gbit/s
    rate: BTreeMap<String, f64>,
    /// Nodes whose first `startServers` launches servers but loses the reply
    lose_first_start_reply: BTreeSet<String>,
    /// Failure returned by `runClient` from a source, after its delay
    client_failures: BTreeMap<String, AgentError>,
    /// Nodes with servers listening, with their (count, start port)
    running: Mutex<BTreeMap<String, (u16, u16)>>,
    /// Server sets launched per node
    launches: Mutex<BTreeMap<String, usize>>,
    lost_replies: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<Call>>,
}

/// Marks a logged call finished when dropped, completed or cancelled.
struct Finish {
    script: Arc<Script>,
    index: usize,
}

impl Drop for Finish {
    fn drop(&mut self) {
        if let Ok(mut calls) = self.script.calls.lock() {
            calls[self.index].finished = Some(Instant::now());
        }
    }
}

#[derive(Clone, Default)]
struct ScriptedAgent {
    script: Arc<Script>,
}

impl ScriptedAgent {
    fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
        }
    }

    fn record(
        &self,
        operation: AgentOperation,
        node: &Node,
        destination: Option<IpAddr>,
    ) -> Finish {
        let mut calls = self.script.calls.lock().unwrap();
        calls.push(Call {
            operation,
            node: node.name.clone(),
            destination,
            started: Instant::now(),
            finished: None,
        });
        Finish {
            script: Arc::clone(&self.script),
            index: calls.len() - 1,
        }
    }

    fn calls(&self, operation: AgentOperation) -> Vec<Call> {
        self.script
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    fn nodes_called(&self, operation: AgentOperation) -> BTreeSet<String> {
        self.calls(operation).into_iter().map(|c| c.node).collect()
    }
}

impl RemoteAgent for ScriptedAgent {
    async fn start_servers(
        &self,
        node: &Node,
        server_count: u16,
        start_port: u16,
    ) -> Result<Ack, AgentError> {
        let _finish = self.record(AgentOperation::StartServers, node, None);
        if self.script.unreachable.contains(&node.name) {
            return Err(AgentError::unreachable(
                &node.name,
                AgentOperation::StartServers,
                "Connection refused",
            ));
        }

        let ack = {
            let mut running = self.script.running.lock().unwrap();
            match running.get(&node.name) {
                Some(&current) if current == (server_count, start_port) => {
                    Ack::new("servers already running")
                }
                _ => {
                    running.insert(node.name.clone(), (server_count, start_port));
                    *self
                        .script
                        .launches
                        .lock()
                        .unwrap()
                        .entry(node.name.clone())
                        .or_default() += 1;
                    Ack::new(format!("started {server_count} servers"))
                }
            }
        };

        if self.script.lose_first_start_reply.contains(&node.name)
            && self.script.lost_replies.lock().unwrap().insert(node.name.clone())
        {
            return Err(AgentError::disconnected(
                &node.name,
                AgentOperation::StartServers,
                "connection reset by peer",
            ));
        }
        Ok(ack)
    }

    async fn run_client(
        &self,
        source: &Node,
        destination: IpAddr,
        port: u16,
        _client_count: u16,
    ) -> Result<ClientTestResult, AgentError> {
        let _finish = self.record(AgentOperation::RunClient, source, Some(destination));
        let delay = self
            .script
            .client_delay
            .get(&source.name)
            .copied()
            .unwrap_or(Duration::from_secs(10));
        tokio::time::sleep(delay).await;
        if let Some(e) = self.script.client_failures.get(&source.name) {
            return Err(e.clone());
        }

        let rate = self.script.rate.get(&source.name).copied().unwrap_or(10.0);
        let mut stats = ClientStatsReply::default();
        stats.sender.aggregate.bitrate = rate;
        stats.receiver.aggregate.bitrate = rate;
        Ok(ClientTestResult::from_reply(destination, port, stats))
    }

    async fn stop_servers(&self, node: &Node) -> Result<Ack, AgentError> {
        let _finish = self.record(AgentOperation::StopServers, node, None);
        if self.script.unreachable.contains(&node.name) {
            return Err(AgentError::unreachable(
                &node.name,
                AgentOperation::StopServers,
                "Connection refused",
            ));
        }
        self.script.running.lock().unwrap().remove(&node.name);
        Ok(Ack::new("stopped"))
    }
}

fn node(name: &str, octet: u8) -> Node {
    Node::new(
        name,
        format!("autopilot-{name}"),
        SocketAddr::from((Ipv4Addr::new(10, 0, 0, octet), 3333)),
        vec![Interface::new(
            "net1-0",
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, octet)),
        )],
    )
}

fn four_nodes() -> NodeMap {
    ["a", "b", "c", "d"]
        .iter()
        .zip(1u8..)
        .map(|(name, octet)| (name.to_string(), node(name, octet)))
        .collect()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> MeshConfig {
    MeshConfig {
        client_timeout: Duration::from_secs(60),
        release_delay: Duration::from_secs(1),
        ..MeshConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn healthy_four_node_mesh() {
    init_logging();
    let agent = ScriptedAgent::default();
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();

    let run = orchestrator.run(&four_nodes()).await.unwrap();

    let rounds: Vec<_> = run
        .states
        .iter()
        .filter(|s| matches!(s, MeshState::RoundRunning { .. }))
        .collect();
    assert_eq!(rounds.len(), 3);
    assert_eq!(run.measurements.len(), 12);
    assert!(run
        .measurements
        .iter()
        .all(|m| m.status == LinkStatus::Success));
    for round in 1..=3 {
        assert_eq!(
            run.measurements.iter().filter(|m| m.link.round == round).count(),
            4
        );
    }
    assert!(run.skipped.is_empty());
    assert!(!run.interrupted);
    assert_eq!(run.final_state(), Some(MeshState::Done));

    assert_eq!(agent.calls(AgentOperation::StartServers).len(), 4);
    assert_eq!(agent.nodes_called(AgentOperation::StopServers).len(), 4);
    assert!(agent.script.running.lock().unwrap().is_empty());

    let report = MeshReport::new(orchestrator.config(), run);
    assert!(report.summary.is_clean());
    let summary = report.summary.interfaces[0].summary.unwrap();
    assert_eq!(summary.links, 12);
    assert!((summary.mean.gbps() - 10.0).abs() < 1e-9);
    assert!(report.to_string().contains("net1-0 Average Bandwidth Gb/s: 10.00"));
}

#[tokio::test(start_paused = true)]
async fn unreachable_node_becomes_serverless() {
    init_logging();
    let agent = ScriptedAgent::new(Script {
        unreachable: BTreeSet::from(["c".to_string()]),
        ..Script::default()
    });
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();
    let nodes = four_nodes();
    let c_address = nodes["c"].interfaces[0].address;

    let run = orchestrator.run(&nodes).await.unwrap();

    assert!(run.serverless.contains_key("c"));
    assert_eq!(run.completed_rounds, 3);

    // never a destination, still a source
    assert!(run.measurements.iter().all(|m| m.link.destination != "c"));
    assert!(run.measurements.iter().all(|m| m.destination_address != c_address));
    assert_eq!(
        run.measurements.iter().filter(|m| m.link.source == "c").count(),
        3
    );
    assert_eq!(run.measurements.len(), 9);
    assert_eq!(run.skipped.len(), 3);
    assert!(run
        .skipped
        .iter()
        .all(|s| s.destination == "c" && s.reason == SkipReason::ServerlessDestination));

    // retried once, then given up
    let c_starts = agent
        .calls(AgentOperation::StartServers)
        .into_iter()
        .filter(|c| c.node == "c")
        .count();
    assert_eq!(c_starts, 2);

    // only nodes whose servers started are stopped
    assert_eq!(
        agent.nodes_called(AgentOperation::StopServers),
        BTreeSet::from(["a".to_string(), "b".to_string(), "d".to_string()])
    );

    let report = AggregateReport::from_run(&run);
    assert_eq!(report.degraded_destinations.len(), 1);
    assert_eq!(report.degraded_destinations[0].node, "c");
    assert!(report.unreachable_pairs.is_empty());
    assert_eq!(report.interfaces[0].skipped, 3);
    assert!(report.interfaces[0].matrix.get("a", "c").is_none());
    assert!(report.to_string().contains("Degraded destinations:"));
}

#[tokio::test(start_paused = true)]
async fn rounds_never_overlap() {
    init_logging();
    let agent = ScriptedAgent::new(Script {
        client_delay: BTreeMap::from([
            ("b".to_string(), Duration::from_secs(45)),
            ("d".to_string(), Duration::from_secs(3)),
        ]),
        ..Script::default()
    });
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();
    let run = orchestrator.run(&four_nodes()).await.unwrap();

    let round_of: BTreeMap<(String, IpAddr), usize> = run
        .measurements
        .iter()
        .map(|m| ((m.link.source.clone(), m.destination_address), m.link.round))
        .collect();

    let mut by_round: BTreeMap<usize, Vec<Call>> = BTreeMap::new();
    for call in agent.calls(AgentOperation::RunClient) {
        let destination = call.destination.unwrap();
        let round = round_of[&(call.node.clone(), destination)];
        by_round.entry(round).or_default().push(call);
    }
    assert_eq!(by_round.len(), 3);

    for round in 1..3 {
        let slowest = by_round[&round]
            .iter()
            .map(|c| c.finished.unwrap())
            .max()
            .unwrap();
        let next_first = by_round[&(round + 1)]
            .iter()
            .map(|c| c.started)
            .min()
            .unwrap();
        assert!(
            next_first >= slowest,
            "round {} started before round {round} finished",
            round + 1
        );
    }

    // all links of a round are released together
    for calls in by_round.values() {
        let first = calls.iter().map(|c| c.started).min().unwrap();
        assert!(calls.iter().all(|c| c.started == first));
    }
}

#[tokio::test(start_paused = true)]
async fn client_timeout_is_contained() {
    init_logging();
    let agent = ScriptedAgent::new(Script {
        client_delay: BTreeMap::from([("d".to_string(), Duration::from_secs(600))]),
        rate: BTreeMap::from([("a".to_string(), 20.0)]),
        ..Script::default()
    });
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();
    let run = orchestrator.run(&four_nodes()).await.unwrap();

    assert_eq!(run.completed_rounds, 3);
    assert_eq!(run.measurements.len(), 12);

    let (from_d, others): (Vec<_>, Vec<_>) =
        run.measurements.iter().partition(|m| m.link.source == "d");
    assert_eq!(from_d.len(), 3);
    assert!(from_d.iter().all(|m| m.status == LinkStatus::Timeout));
    assert!(from_d.iter().all(|m| m.throughput().is_none()));
    assert!(others.iter().all(|m| m.is_success()));

    // no retries within the run
    assert_eq!(agent.calls(AgentOperation::RunClient).len(), 12);
    assert_eq!(agent.nodes_called(AgentOperation::StopServers).len(), 4);

    let report = AggregateReport::from_run(&run);
    assert_eq!(report.unreachable_pairs.len(), 3);
    let summary = report.interfaces[0].summary.unwrap();
    assert_eq!(summary.links, 9);
    assert!((summary.max.gbps() - 20.0).abs() < 1e-9);
    assert!((summary.min.gbps() - 10.0).abs() < 1e-9);
    assert_eq!(report.interfaces[0].matrix.get("d", "a"), None);
}

#[tokio::test(start_paused = true)]
async fn lost_start_reply_is_retried_without_duplicate_servers() {
    init_logging();
    let agent = ScriptedAgent::new(Script {
        lose_first_start_reply: BTreeSet::from(["b".to_string()]),
        ..Script::default()
    });
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();

    let run = orchestrator.run(&four_nodes()).await.unwrap();

    // the retry found the servers of the first attempt already running
    let b_starts = agent
        .calls(AgentOperation::StartServers)
        .into_iter()
        .filter(|c| c.node == "b")
        .count();
    assert_eq!(b_starts, 2);
    assert_eq!(agent.script.launches.lock().unwrap()["b"], 1);
    assert!(run.serverless.is_empty());

    // b serves as a destination in every round
    assert_eq!(
        run.measurements
            .iter()
            .filter(|m| m.link.destination == "b" && m.is_success())
            .count(),
        3
    );
    assert_eq!(run.measurements.len(), 12);
    assert!(agent
        .nodes_called(AgentOperation::StopServers)
        .contains("b"));
    assert!(agent.script.running.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn client_failures_are_transport_errors() {
    init_logging();
    let agent = ScriptedAgent::new(Script {
        client_failures: BTreeMap::from([
            (
                "b".to_string(),
                AgentError::malformed("b", AgentOperation::RunClient, "iperf3: error"),
            ),
            (
                "c".to_string(),
                AgentError::unreachable("c", AgentOperation::RunClient, "Connection refused"),
            ),
        ]),
        ..Script::default()
    });
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();

    let run = orchestrator.run(&four_nodes()).await.unwrap();

    assert_eq!(run.completed_rounds, 3);
    assert_eq!(run.final_state(), Some(MeshState::Done));
    assert_eq!(run.measurements.len(), 12);
    for m in &run.measurements {
        if m.link.source == "b" || m.link.source == "c" {
            assert_eq!(m.status, LinkStatus::TransportError, "{:?}", m.link);
            assert!(m.error.as_deref().is_some_and(|e| e.contains("runClient")));
        } else {
            assert!(m.is_success(), "{:?}", m.link);
        }
    }

    // no retries within the run, teardown still happens
    assert_eq!(agent.calls(AgentOperation::RunClient).len(), 12);
    assert_eq!(agent.nodes_called(AgentOperation::StopServers).len(), 4);

    let report = AggregateReport::from_run(&run);
    assert_eq!(report.unreachable_pairs.len(), 6);
    assert!(report
        .unreachable_pairs
        .iter()
        .all(|p| p.status == LinkStatus::TransportError));
    assert_eq!(report.interfaces[0].summary.unwrap().links, 6);
    assert_eq!(report.interfaces[0].matrix.get("b", "c"), None);
    assert!(report.to_string().contains("b -> c (interface 0, round 1): transport error"));
}

#[tokio::test]
async fn empty_selection_aborts_before_any_request() {
    init_logging();
    let agent = ScriptedAgent::default();
    let orchestrator = MeshOrchestrator::new(agent.clone(), config()).unwrap();
    let directory = InventoryDirectory::new(Inventory::default());

    let err = orchestrator
        .execute(&directory, &NodeSelection::all())
        .await
        .unwrap_err();
    assert!(err.is_setup_failure());
    assert!(agent.script.calls.lock().unwrap().is_empty());

    let selection = NodeSelection::from_args("ghost", None, None).unwrap();
    assert!(directory.resolve(&selection).await.is_err());
}
