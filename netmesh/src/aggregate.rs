//! Reduce link measurements into per-interface summaries and matrices.
//!
//! Only successful measurements enter the numbers, using receiver-side throughput. Failed
//! links are listed as unreachable pairs. Matrix cells without a measurement render as
//! `N/A`, never as zero.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use netmesh_common::{LinkMeasurement, LinkStatus, Throughput};
use serde::{Deserialize, Serialize};

use crate::{orchestrator::MeshRun, stats::calculate_basic_stats};

/// Throughput statistics over the successful links of one interface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSummary {
    pub links: usize,
    pub mean: Throughput,
    pub min: Throughput,
    pub max: Throughput,
    pub median: Throughput,
}

impl ThroughputSummary {
    /// `None` when nothing was measured.
    pub fn from_samples(samples: &[Throughput]) -> Option<Self> {
        let bits: Vec<f64> = samples.iter().map(|t| t.bits_per_sec()).collect();
        let stats = calculate_basic_stats(&bits)?;
        Some(Self {
            links: stats.count,
            mean: Throughput::from_bits_per_sec(stats.mean),
            min: Throughput::from_bits_per_sec(stats.min),
            max: Throughput::from_bits_per_sec(stats.max),
            median: Throughput::from_bits_per_sec(stats.median),
        })
    }
}

/// Source × destination grid for one interface, in node order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputMatrix {
    pub nodes: Vec<String>,
    /// `cells[source][destination]`
    pub cells: Vec<Vec<Option<Throughput>>>,
}

impl ThroughputMatrix {
    pub fn new(nodes: Vec<String>) -> Self {
        let n = nodes.len();
        Self {
            nodes,
            cells: vec![vec![None; n]; n],
        }
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == name)
    }

    pub fn set(&mut self, source: &str, destination: &str, value: Throughput) {
        if let (Some(s), Some(d)) = (self.index(source), self.index(destination)) {
            self.cells[s][d] = Some(value);
        }
    }

    #[must_use]
    pub fn get(&self, source: &str, destination: &str) -> Option<Throughput> {
        self.cells[self.index(source)?][self.index(destination)?]
    }
}

impl fmt::Display for ThroughputMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const CORNER: &str = "src/dst";
        let width = self
            .nodes
            .iter()
            .map(String::len)
            .chain([CORNER.len(), 8])
            .max()
            .unwrap_or(8)
            + 2;

        write!(f, "{CORNER:<width$}")?;
        for node in &self.nodes {
            write!(f, "{node:<width$}")?;
        }
        writeln!(f)?;

        for (source, row) in self.nodes.iter().zip(&self.cells) {
            write!(f, "{source:<width$}")?;
            for cell in row {
                match cell {
                    Some(t) => write!(f, "{:<width$}", format!("{:.2}", t.gbps()))?,
                    None => write!(f, "{:<width$}", "N/A")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Aggregates of one interface pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceReport {
    pub interface: usize,
    pub name: String,
    /// Absent when no link succeeded
    pub summary: Option<ThroughputSummary>,
    pub failed: usize,
    pub skipped: usize,
    pub matrix: ThroughputMatrix,
}

/// A link that ran and failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreachablePair {
    pub source: String,
    pub destination: String,
    pub interface: usize,
    pub round: usize,
    pub status: LinkStatus,
    pub error: Option<String>,
}

/// A node that could not be measured as a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedDestination {
    pub node: String,
    pub reason: String,
}

/// Read-only view over the measurements of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub interfaces: Vec<InterfaceReport>,
    pub unreachable_pairs: Vec<UnreachablePair>,
    pub degraded_destinations: Vec<DegradedDestination>,
}

/// Aggregate `measurements` over nodes in `node_order`.
///
/// Interfaces appear in index order; only indices with at least one measurement are
/// reported.
pub fn aggregate<S: AsRef<str>>(
    node_order: &[S],
    measurements: &[LinkMeasurement],
) -> AggregateReport {
    let nodes: Vec<String> = node_order.iter().map(|n| n.as_ref().to_string()).collect();

    let mut by_interface: BTreeMap<usize, Vec<&LinkMeasurement>> = BTreeMap::new();
    for m in measurements {
        by_interface.entry(m.link.interface).or_default().push(m);
    }

    let interfaces = by_interface
        .into_iter()
        .map(|(interface, links)| {
            let mut matrix = ThroughputMatrix::new(nodes.clone());
            let mut samples = Vec::new();
            for m in &links {
                if let Some(t) = m.throughput() {
                    matrix.set(&m.link.source, &m.link.destination, t);
                    samples.push(t);
                }
            }
            InterfaceReport {
                interface,
                name: links
                    .first()
                    .map(|m| m.link.interface_name.clone())
                    .unwrap_or_default(),
                summary: ThroughputSummary::from_samples(&samples),
                failed: links.len() - samples.len(),
                skipped: 0,
                matrix,
            }
        })
        .collect();

    let unreachable_pairs = measurements
        .iter()
        .filter(|m| !m.is_success())
        .map(|m| UnreachablePair {
            source: m.link.source.clone(),
            destination: m.link.destination.clone(),
            interface: m.link.interface,
            round: m.link.round,
            status: m.status,
            error: m.error.clone(),
        })
        .collect();

    AggregateReport {
        interfaces,
        unreachable_pairs,
        degraded_destinations: Vec::new(),
    }
}

impl AggregateReport {
    /// Aggregate a whole run, including interfaces that measured nothing, skipped links
    /// and destinations that could not be measured.
    pub fn from_run(run: &MeshRun) -> Self {
        let order = run.node_order();
        let mut report = aggregate(&order, &run.measurements);

        for interface in 0..run.interface_count {
            if report.interfaces.iter().any(|r| r.interface == interface) {
                continue;
            }
            let name = run
                .nodes
                .iter()
                .find_map(|n| n.interface(interface))
                .map(|i| i.name.clone())
                .unwrap_or_default();
            report.interfaces.push(InterfaceReport {
                interface,
                name,
                summary: None,
                failed: 0,
                skipped: 0,
                matrix: ThroughputMatrix::new(order.iter().map(|n| (*n).to_string()).collect()),
            });
        }
        report.interfaces.sort_by_key(|r| r.interface);

        for skipped in &run.skipped {
            if let Some(r) = report
                .interfaces
                .iter_mut()
                .find(|r| r.interface == skipped.interface)
            {
                r.skipped += 1;
            }
        }

        for (node, error) in &run.serverless {
            report.degraded_destinations.push(DegradedDestination {
                node: node.clone(),
                reason: format!("servers not started: {error}"),
            });
        }

        // destinations whose every attempted inbound link failed
        let mut inbound: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for m in &run.measurements {
            let entry = inbound.entry(m.link.destination.as_str()).or_default();
            entry.0 += 1;
            if m.is_success() {
                entry.1 += 1;
            }
        }
        let serverless: BTreeSet<&str> = run.serverless.keys().map(String::as_str).collect();
        for (node, (attempted, succeeded)) in inbound {
            if succeeded == 0 && !serverless.contains(node) {
                report.degraded_destinations.push(DegradedDestination {
                    node: node.to_string(),
                    reason: format!("all {attempted} inbound link(s) failed"),
                });
            }
        }

        report
    }

    /// Whether every attempted link succeeded and every node served.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unreachable_pairs.is_empty() && self.degraded_destinations.is_empty()
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in &self.interfaces {
            match &r.summary {
                Some(s) => writeln!(
                    f,
                    "{} Average Bandwidth Gb/s: {:.2} (min {:.2}, max {:.2}, {} link(s))",
                    r.name,
                    s.mean.gbps(),
                    s.min.gbps(),
                    s.max.gbps(),
                    s.links
                )?,
                None => writeln!(f, "{} Average Bandwidth Gb/s: N/A", r.name)?,
            }
            if r.failed > 0 || r.skipped > 0 {
                writeln!(f, "    {} failed, {} skipped", r.failed, r.skipped)?;
            }
            writeln!(f)?;
            write!(f, "{}", r.matrix)?;
            writeln!(f)?;
        }

        if !self.unreachable_pairs.is_empty() {
            writeln!(f, "Unreachable pairs:")?;
            for p in &self.unreachable_pairs {
                let status = match p.status {
                    LinkStatus::Timeout => "timeout",
                    LinkStatus::TransportError => "transport error",
                    LinkStatus::Success => "success",
                };
                writeln!(
                    f,
                    "    {} -> {} (interface {}, round {}): {status}",
                    p.source, p.destination, p.interface, p.round
                )?;
            }
        }

        if !self.degraded_destinations.is_empty() {
            writeln!(f, "Degraded destinations:")?;
            for d in &self.degraded_destinations {
                writeln!(f, "    {}: {}", d.node, d.reason)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use netmesh_common::LinkKey;

    use super::*;

    fn key(source: &str, destination: &str, round: usize) -> LinkKey {
        LinkKey {
            source: source.to_string(),
            destination: destination.to_string(),
            interface: 0,
            interface_name: "net1-0".to_string(),
            round,
        }
    }

    fn ok(source: &str, destination: &str, gbps: f64) -> LinkMeasurement {
        LinkMeasurement::success(
            key(source, destination, 1),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Throughput::from_gbps(gbps + 0.1),
            Throughput::from_gbps(gbps),
            1000,
        )
    }

    fn timed_out(source: &str, destination: &str) -> LinkMeasurement {
        LinkMeasurement::failed(
            key(source, destination, 1),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            LinkStatus::Timeout,
            "runClient on a: timed out after 60000ms",
            60_000,
        )
    }

    #[test]
    fn test_mean_min_max_exclude_failures() {
        let measurements = vec![ok("a", "b", 10.0), ok("b", "c", 20.0), timed_out("c", "a")];
        let report = aggregate(&["a", "b", "c"], &measurements);

        assert_eq!(report.interfaces.len(), 1);
        let iface = &report.interfaces[0];
        assert_eq!(iface.name, "net1-0");
        assert_eq!(iface.failed, 1);

        let summary = iface.summary.unwrap();
        assert_eq!(summary.links, 2);
        assert!((summary.mean.gbps() - 15.0).abs() < 1e-9);
        assert!((summary.min.gbps() - 10.0).abs() < 1e-9);
        assert!((summary.max.gbps() - 20.0).abs() < 1e-9);

        assert_eq!(report.unreachable_pairs.len(), 1);
        assert_eq!(report.unreachable_pairs[0].source, "c");
        assert_eq!(report.unreachable_pairs[0].status, LinkStatus::Timeout);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_matrix_distinguishes_missing_from_zero() {
        let measurements = vec![ok("a", "b", 0.0), timed_out("b", "a")];
        let report = aggregate(&["a", "b"], &measurements);
        let matrix = &report.interfaces[0].matrix;

        assert_eq!(matrix.get("a", "b"), Some(Throughput::ZERO));
        assert_eq!(matrix.get("b", "a"), None);
        assert_eq!(matrix.get("a", "zzz"), None);

        let text = matrix.to_string();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].starts_with("src/dst"));
        let row_a: Vec<&str> = rows[1].split_whitespace().collect();
        let row_b: Vec<&str> = rows[2].split_whitespace().collect();
        assert_eq!(row_a, ["a", "N/A", "0.00"]);
        assert_eq!(row_b, ["b", "N/A", "N/A"]);
    }

    #[test]
    fn test_display_rounds_to_two_decimals() {
        let report = aggregate(&["a", "b"], &[ok("a", "b", 18.756), ok("b", "a", 18.766)]);
        let text = report.to_string();
        assert!(text.contains("net1-0 Average Bandwidth Gb/s: 18.76"), "{text}");
        assert!(text.contains("18.77"));
        assert!(!text.contains("Unreachable pairs"));

        // full precision kept internally
        let mean = report.interfaces[0].summary.unwrap().mean.gbps();
        assert!((mean - 18.761).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let report = aggregate::<&str>(&[], &[]);
        assert!(report.interfaces.is_empty());
        assert!(report.is_clean());
        assert_eq!(report.to_string(), "");
    }
}
