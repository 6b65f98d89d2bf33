//! Command-line interface definitions for the netmesh utility

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use netmesh_common::{DEFAULT_CONTROL_PORT, DEFAULT_PARALLEL_CLIENTS, DEFAULT_START_PORT};

/// netmesh - iperf3 mesh tests across cluster nodes
#[derive(Parser, Debug)]
#[command(
    version,
    about = "netmesh - ring-topology iperf3 mesh tests across cluster nodes",
    long_about = "
netmesh measures node-to-node bandwidth on every data-plane interface of a set of
cluster nodes. Each node runs an agent that starts iperf3 servers and clients on
request; netmesh drives them through a ring schedule so every ordered pair of nodes
is tested exactly once per interface, one round at a time.

Individual link failures are reported, not fatal: the exit status is 0 whenever the
schedule ran to completion.
"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace)
    ///
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, default_value = "info", value_name = "LEVEL")]
    pub log_level: LevelFilter,

    /// Shorthand for `--log-level debug`
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    #[must_use]
    pub fn effective_log_level(&self) -> LevelFilter {
        if self.verbose {
            self.log_level.max(LevelFilter::Debug)
        } else {
            self.log_level
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a mesh test
    ///
    /// Starts iperf3 servers on every selected node, runs the round schedule once per
    /// interface and prints per-interface averages and a source/destination matrix.
    Run(RunArgs),

    /// Print the round schedule without contacting any agent
    Plan(TargetArgs),

    /// Stop iperf3 servers on the selected nodes
    ///
    /// Cleans up after an interrupted or crashed run.
    Stop(TargetArgs),
}

/// Where nodes come from and which of them take part
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Inventory file describing the nodes (JSON format)
    ///
    /// Lists node names, agent control endpoints, labels and data-plane interfaces.
    #[arg(long, value_name = "FILE")]
    pub inventory: Option<PathBuf>,

    /// Namespace of the agent service when discovering through Kubernetes
    #[arg(long, env = "NAMESPACE", default_value = "autopilot", value_name = "NAMESPACE")]
    pub namespace: String,

    /// Agent control port when discovering through Kubernetes
    #[arg(
        long,
        env = "AUTOPILOT_HEALTHCHECKS_SERVICE_PORT",
        default_value_t = DEFAULT_CONTROL_PORT,
        value_name = "PORT"
    )]
    pub control_port: u16,

    /// Nodes to test: `all` or a comma-separated list of node names
    #[arg(long, default_value = "all", value_name = "NODES")]
    pub nodes: String,

    /// Node label selector, e.g. `gpu=h100,!drained`
    #[arg(long, value_name = "SELECTOR")]
    pub labels: Option<String>,

    /// Nodes running a workload, as `namespace:label-selector`
    #[arg(long, value_name = "NAMESPACE:SELECTOR")]
    pub job: Option<String>,
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Network workload (currently only `ring`)
    #[arg(long, default_value = "ring", value_name = "WORKLOAD")]
    pub workload: String,

    /// iperf3 clients per link, and servers started per node
    #[arg(long, default_value_t = DEFAULT_PARALLEL_CLIENTS, value_name = "COUNT")]
    pub pclients: u16,

    /// First iperf3 server port
    #[arg(long, default_value_t = DEFAULT_START_PORT, value_name = "PORT")]
    pub startport: u16,

    /// Also stop servers on nodes that failed to start them
    #[arg(long)]
    pub cleanup: bool,

    /// Bound on each client test in seconds
    #[arg(long, default_value = "60", value_name = "SECONDS")]
    pub client_timeout: u64,

    /// Bound on server start and stop requests in seconds
    #[arg(long, default_value = "600", value_name = "SECONDS")]
    pub control_timeout: u64,

    /// Settle time before the links of a round are released, in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub release_delay_ms: u64,

    /// Attempts for server start on transient failures
    #[arg(long, default_value = "2", value_name = "COUNT")]
    pub start_attempts: u32,

    /// Output file for the full report (JSON format)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
