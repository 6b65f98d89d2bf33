//! Round schedules for mesh workloads.
//!
//! A schedule is a sequence of rounds; every node sends from exactly one pair per round
//! and rounds run strictly one after another, so no iperf3 server port is shared by two
//! concurrent tests.
//!
//! The ring workload pairs node `i` with node `(i + t) mod N` in round `t` for
//! `t = 1..N-1`. Every ordered pair of distinct nodes shows up in exactly one round.
//! The result depends on the order of the input list, so callers fix that order first.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// One directed client→server test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub source: String,
    pub destination: String,
}

/// A set of pairs executed concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number (the ring shift)
    pub number: usize,
    pub pairs: Vec<Pair>,
}

/// Ordered rounds of one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSchedule {
    rounds: Vec<Round>,
}

impl RoundSchedule {
    #[must_use]
    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Total number of pairs over all rounds.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.rounds.iter().map(|r| r.pairs.len()).sum()
    }
}

impl fmt::Display for RoundSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for round in &self.rounds {
            writeln!(f, "Round {}:", round.number)?;
            for pair in &round.pairs {
                writeln!(f, "    {} -> {}", pair.source, pair.destination)?;
            }
        }
        Ok(())
    }
}

/// Ring schedule over `nodes` in the given order.
///
/// Fewer than two nodes yield an empty schedule.
pub fn ring<S: AsRef<str>>(nodes: &[S]) -> RoundSchedule {
    let n = nodes.len();
    if n < 2 {
        return RoundSchedule::default();
    }

    let rounds = (1..n)
        .map(|shift| Round {
            number: shift,
            pairs: (0..n)
                .map(|i| (i, (i + shift) % n))
                .filter(|(src, dst)| src != dst)
                .map(|(src, dst)| Pair {
                    source: nodes[src].as_ref().to_string(),
                    destination: nodes[dst].as_ref().to_string(),
                })
                .collect(),
        })
        .collect();

    RoundSchedule { rounds }
}

/// Supported network workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    #[default]
    Ring,
}

impl Workload {
    pub fn schedule<S: AsRef<str>>(self, nodes: &[S]) -> RoundSchedule {
        match self {
            Self::Ring => ring(nodes),
        }
    }
}

impl FromStr for Workload {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ring" => Ok(Self::Ring),
            other => Err(MeshError::config(format!(
                "unsupported workload {other:?} (supported: ring)"
            ))),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ring => f.write_str("ring"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{i}")).collect()
    }

    #[test]
    fn test_ring_degenerate_sizes() {
        assert!(ring::<String>(&[]).is_empty());
        assert!(ring(&["solo"]).is_empty());
    }

    #[test]
    fn test_ring_shape_and_coverage() {
        for n in 2..=9 {
            let nodes = names(n);
            let schedule = ring(&nodes);
            assert_eq!(schedule.len(), n - 1, "rounds for n={n}");

            let mut seen: HashMap<(String, String), usize> = HashMap::new();
            for (idx, round) in schedule.rounds().iter().enumerate() {
                assert_eq!(round.number, idx + 1);
                assert_eq!(round.pairs.len(), n, "pairs per round for n={n}");

                let sources: HashSet<_> = round.pairs.iter().map(|p| &p.source).collect();
                let destinations: HashSet<_> =
                    round.pairs.iter().map(|p| &p.destination).collect();
                assert_eq!(sources.len(), n, "every node sends once per round");
                assert_eq!(destinations.len(), n, "every node receives once per round");

                for pair in &round.pairs {
                    assert_ne!(pair.source, pair.destination);
                    *seen
                        .entry((pair.source.clone(), pair.destination.clone()))
                        .or_default() += 1;
                }
            }

            assert_eq!(seen.len(), n * (n - 1));
            assert!(seen.values().all(|&count| count == 1));
            assert_eq!(schedule.pair_count(), n * (n - 1));
        }
    }

    #[test]
    fn test_ring_depends_on_order() {
        let forward = ring(&["a", "b", "c"]);
        let reversed = ring(&["c", "b", "a"]);
        assert_eq!(forward, ring(&["a", "b", "c"]));
        assert_ne!(forward, reversed);

        let first = &forward.rounds()[0].pairs;
        assert_eq!(first[0].source, "a");
        assert_eq!(first[0].destination, "b");
        assert_eq!(first[2].source, "c");
        assert_eq!(first[2].destination, "a");
    }

    #[test]
    fn test_workload_parsing() {
        assert_eq!("ring".parse::<Workload>().unwrap(), Workload::Ring);
        assert_eq!(" RING ".parse::<Workload>().unwrap(), Workload::Ring);
        let err = "alltoall".parse::<Workload>().unwrap_err();
        assert!(err.is_setup_failure());
        assert!(err.to_string().contains("alltoall"));
    }

    #[test]
    fn test_schedule_display() {
        let text = ring(&["a", "b"]).to_string();
        assert_eq!(text, "Round 1:\n    a -> b\n    b -> a\n");
    }
}
