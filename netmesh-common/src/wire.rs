//! JSON document returned by a node agent for a client test.
//!
//! The agent runs `numclients` iperf3 clients against consecutive destination ports and
//! summarises them per direction:
//!
//! ```json
//! {
//!   "sender":   { "aggregate": { "transfer": "10.9", "bitrate": "18.8" },
//!                 "mean": { ... }, "min": { ... }, "max": { ... } },
//!   "receiver": { "aggregate": { "transfer": "10.9", "bitrate": "18.7" }, ... }
//! }
//! ```
//!
//! Transfers are in GBytes and bitrates in Gbits/sec. Values arrive as decimal strings,
//! plain numbers are accepted too.

use std::net::IpAddr;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::measurement::Throughput;

/// Transfer volume and bitrate pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RatePair {
    #[serde(deserialize_with = "decimal")]
    pub transfer: f64,
    #[serde(deserialize_with = "decimal")]
    pub bitrate: f64,
}

/// Statistics over the parallel clients for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionStats {
    pub aggregate: RatePair,
    #[serde(default)]
    pub mean: RatePair,
    #[serde(default)]
    pub min: RatePair,
    #[serde(default)]
    pub max: RatePair,
}

/// Body of a successful `/iperfclients` call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientStatsReply {
    pub sender: DirectionStats,
    pub receiver: DirectionStats,
}

impl ClientStatsReply {
    /// Parse a reply body, tolerating log lines printed around the JSON object.
    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        let body = body.trim();
        match serde_json::from_str(body) {
            Ok(reply) => Ok(reply),
            Err(e) => match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&body[start..=end]).map_err(|_| e)
                }
                _ => Err(e),
            },
        }
    }
}

/// A client test as seen from the source node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTestResult {
    /// Destination data-plane address
    pub destination: IpAddr,
    /// First destination port used
    pub port: u16,
    /// Aggregate sender-side bitrate
    pub sender: Throughput,
    /// Aggregate receiver-side bitrate
    pub receiver: Throughput,
    /// Full per-direction statistics as reported by the agent
    pub stats: ClientStatsReply,
}

impl ClientTestResult {
    #[must_use]
    pub fn from_reply(destination: IpAddr, port: u16, stats: ClientStatsReply) -> Self {
        Self {
            destination,
            port,
            sender: Throughput::from_gbps(stats.sender.aggregate.bitrate),
            receiver: Throughput::from_gbps(stats.receiver.aggregate.bitrate),
            stats,
        }
    }
}

fn decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Number(f64),
        Text(String),
    }

    let value = match Decimal::deserialize(deserializer)? {
        Decimal::Number(n) => n,
        Decimal::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| de::Error::custom(format!("invalid rate {s:?}: {e}")))?,
    };

    if !value.is_finite() || value < 0.0 {
        return Err(de::Error::custom(format!("rate out of range: {value}")));
    }
    Ok(value)
}
