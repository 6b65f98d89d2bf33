//! Per-link measurement records produced by a mesh run.

use std::{fmt, net::IpAddr};

use serde::{Deserialize, Serialize};

const BITS_PER_GBIT: f64 = 1_000_000_000.0;

/// Throughput in bits per second.
///
/// Stored at full precision; only display paths round.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Throughput(f64);

impl Throughput {
    pub const ZERO: Self = Self(0.0);

    #[must_use]
    pub const fn from_bits_per_sec(bps: f64) -> Self {
        Self(bps)
    }

    #[must_use]
    pub fn from_gbps(gbps: f64) -> Self {
        Self(gbps * BITS_PER_GBIT)
    }

    #[must_use]
    pub const fn bits_per_sec(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn gbps(self) -> f64 {
        self.0 / BITS_PER_GBIT
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} Gb/s", self.gbps())
    }
}

/// Outcome of one client test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStatus {
    Success,
    Timeout,
    TransportError,
}

/// Identity of a scheduled link test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkKey {
    /// Node running the iperf3 clients
    pub source: String,
    /// Node whose servers are targeted
    pub destination: String,
    /// Interface index the test ran on
    pub interface: usize,
    /// Interface name on the destination
    pub interface_name: String,
    /// 1-based round (ring shift) number
    pub round: usize,
}

/// One source→destination throughput sample.
///
/// Written exactly once by the task that ran the test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMeasurement {
    #[serde(flatten)]
    pub link: LinkKey,
    /// Destination data-plane address the clients connected to
    pub destination_address: IpAddr,
    pub status: LinkStatus,
    /// Aggregate bitrate reported by the iperf3 senders
    pub sender: Option<Throughput>,
    /// Aggregate bitrate reported by the iperf3 receivers
    pub receiver: Option<Throughput>,
    /// Wall time from release to resolution
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl LinkMeasurement {
    #[must_use]
    pub fn success(
        link: LinkKey,
        destination_address: IpAddr,
        sender: Throughput,
        receiver: Throughput,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            link,
            destination_address,
            status: LinkStatus::Success,
            sender: Some(sender),
            receiver: Some(receiver),
            elapsed_ms,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        link: LinkKey,
        destination_address: IpAddr,
        status: LinkStatus,
        error: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            link,
            destination_address,
            status,
            sender: None,
            receiver: None,
            elapsed_ms,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == LinkStatus::Success
    }

    /// Receiver-side throughput of a successful test.
    #[must_use]
    pub fn throughput(&self) -> Option<Throughput> {
        if self.is_success() {
            self.receiver
        } else {
            None
        }
    }
}

/// Why a scheduled pair was not tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// The destination never acknowledged `startServers`
    ServerlessDestination,
    /// One end has fewer interfaces than the index under test
    MissingInterface { node: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerlessDestination => write!(f, "destination has no running servers"),
            Self::MissingInterface { node } => write!(f, "{node} lacks this interface"),
        }
    }
}

/// A scheduled pair that was deliberately not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedLink {
    pub source: String,
    pub destination: String,
    pub interface: usize,
    pub round: usize,
    #[serde(flatten)]
    pub reason: SkipReason,
}
