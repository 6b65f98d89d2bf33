//! Common types and constants for the netmesh iperf3 mesh tester.
//!
//! This crate provides the data model shared by the directory, the orchestrator, the
//! aggregator and the CLI: cluster nodes and their data-plane interfaces, per-link
//! measurements, and the JSON document node agents return for a client test.

pub mod measurement;
pub mod node;
pub mod wire;

pub use measurement::{LinkKey, LinkMeasurement, LinkStatus, SkipReason, SkippedLink, Throughput};
pub use node::{Interface, Node};
pub use wire::{ClientStatsReply, ClientTestResult, DirectionStats, RatePair};

/// Port the node agents serve their health-check/control API on.
pub const DEFAULT_CONTROL_PORT: u16 = 3333;

/// First iperf3 server port; server `i` of a node listens on `DEFAULT_START_PORT + i`.
pub const DEFAULT_START_PORT: u16 = 5200;

/// Number of iperf3 client instances launched per link test.
pub const DEFAULT_PARALLEL_CLIENTS: u16 = 8;

/// Control endpoint path that starts iperf3 servers on a node.
pub const START_SERVERS_PATH: &str = "/iperfservers";

/// Control endpoint path that runs iperf3 clients from a node.
pub const RUN_CLIENTS_PATH: &str = "/iperfclients";

/// Control endpoint path that stops every iperf3 server on a node.
pub const STOP_SERVERS_PATH: &str = "/iperfstopservers";

/// Pod annotation written by Multus with the attachments of a pod.
pub const NETWORK_STATUS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/network-status";

/// Interface names that never carry data-plane traffic.
pub const MANAGEMENT_INTERFACES: &[&str] = &["eth0", "lo"];

/// Interface name used when a node only exposes its primary pod address.
pub const FALLBACK_INTERFACE_NAME: &str = "default";
