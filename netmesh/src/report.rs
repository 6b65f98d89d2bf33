//! Final report of a mesh run
//!
//! The printed form is the per-interface average lines and the source × destination
//! matrices. The JSON form additionally carries the settings, the schedule and every raw
//! measurement.

use std::{fmt, path::Path};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::AggregateReport, config::MeshConfig, error::Result, orchestrator::MeshRun,
    stats::save_json_results, topology::Workload,
};

/// Settings a run was made with
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub workload: Workload,
    pub parallel_clients: u16,
    pub start_port: u16,
    pub client_timeout_ms: u64,
    pub control_timeout_ms: u64,
    pub release_delay_ms: u64,
    pub cleanup: bool,
}

impl From<&MeshConfig> for RunSettings {
    fn from(config: &MeshConfig) -> Self {
        let ms = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            workload: config.workload,
            parallel_clients: config.parallel_clients,
            start_port: config.start_port,
            client_timeout_ms: ms(config.client_timeout),
            control_timeout_ms: ms(config.control_timeout),
            release_delay_ms: ms(config.release_delay),
            cleanup: config.cleanup,
        }
    }
}

/// Complete results of a mesh run
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MeshReport {
    /// ISO 8601 timestamp of when the report was produced
    pub timestamp: String,
    pub settings: RunSettings,
    /// Node names in schedule order
    pub node_order: Vec<String>,
    pub run: MeshRun,
    pub summary: AggregateReport,
}

impl MeshReport {
    pub fn new(config: &MeshConfig, run: MeshRun) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            settings: RunSettings::from(config),
            node_order: run.node_order().into_iter().map(str::to_string).collect(),
            summary: AggregateReport::from_run(&run),
            run,
        }
    }

    /// Write the report as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json_results(self, path)
    }
}

impl fmt::Display for MeshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Mesh test ({}) started {}: ",
            self.settings.workload,
            self.run.started_at.to_rfc3339()
        )?;
        writeln!(
            f,
            "{} node(s), {}/{} round(s), {} link(s) measured, {} failed, {} skipped",
            self.node_order.len(),
            self.run.completed_rounds,
            self.run.planned_rounds(),
            self.run.measurements.len(),
            self.run.failed_links(),
            self.run.skipped.len()
        )?;
        if self.run.interrupted {
            writeln!(f, "Run interrupted, results are partial")?;
        }
        writeln!(f)?;
        write!(f, "{}", self.summary)?;
        if !self.run.stop_failures.is_empty() {
            writeln!(f, "Servers possibly left running:")?;
            for (node, error) in &self.run.stop_failures {
                writeln!(f, "    {node}: {error}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        net::{IpAddr, Ipv4Addr, SocketAddr},
        time::Duration,
    };

    use netmesh_common::{Interface, LinkKey, LinkMeasurement, LinkStatus, Node, Throughput};

    use super::*;
    use crate::{orchestrator::MeshState, topology::ring};

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

    fn key(source: &str, destination: &str) -> LinkKey {
        LinkKey {
            source: source.to_string(),
            destination: destination.to_string(),
            interface: 0,
            interface_name: "net1-0".to_string(),
            round: 1,
        }
    }

    fn partial_run() -> MeshRun {
        let address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let gbps = Throughput::from_gbps;
        MeshRun {
            started_at: Utc::now(),
            duration_ms: 1500,
            nodes: vec![node("a", 1), node("b", 2), node("c", 3)],
            interface_count: 1,
            schedule: ring(&["a", "b", "c"]),
            serverless: BTreeMap::new(),
            stop_failures: BTreeMap::from([("b".to_string(), "connection refused".to_string())]),
            measurements: vec![
                LinkMeasurement::success(key("a", "b"), address, gbps(10.0), gbps(10.0), 10),
                LinkMeasurement::success(key("b", "c"), address, gbps(20.0), gbps(20.0), 10),
                LinkMeasurement::failed(
                    key("c", "a"),
                    address,
                    LinkStatus::Timeout,
                    "timed out",
                    60,
                ),
            ],
            skipped: Vec::new(),
            completed_rounds: 1,
            interrupted: true,
            states: vec![MeshState::Idle, MeshState::Done],
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = MeshConfig {
            release_delay: Duration::ZERO,
            cleanup: true,
            ..MeshConfig::default()
        };
        let settings = RunSettings::from(&config);
        assert_eq!(settings.workload, Workload::Ring);
        assert_eq!(settings.release_delay_ms, 0);
        assert_eq!(settings.client_timeout_ms, 60_000);
        assert!(settings.cleanup);
    }

    #[test]
    fn test_partial_report_display() {
        let report = MeshReport::new(&MeshConfig::default(), partial_run());
        assert_eq!(report.node_order, ["a", "b", "c"]);

        let text = report.to_string();
        assert!(text.contains("3 node(s), 1/2 round(s), 3 link(s) measured, 1 failed"));
        assert!(text.contains("Run interrupted, results are partial"));
        assert!(text.contains("net1-0 Average Bandwidth Gb/s: 15.00"));
        assert!(text.contains("c -> a (interface 0, round 1): timeout"));
        assert!(text.contains("a: all 1 inbound link(s) failed"));
        assert!(text.contains("Servers possibly left running:"));
        assert!(!report.summary.is_clean());
    }

    #[test]
    fn test_save_writes_json() {
        let report = MeshReport::new(&MeshConfig::default(), partial_run());
        let path = std::env::temp_dir().join(format!("netmesh-report-{}.json", std::process::id()));
        report.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(json["node_order"], serde_json::json!(["a", "b", "c"]));
        assert_eq!(json["settings"]["workload"], serde_json::json!("ring"));
        assert_eq!(json["run"]["measurements"].as_array().map(Vec::len), Some(3));
        assert_eq!(json["run"]["interrupted"], serde_json::json!(true));
    }
}
