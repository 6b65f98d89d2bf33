//! Data-plane interfaces from the CNI `network-status` pod annotation.
//!
//! Multus records every attachment of a pod as a JSON list:
//!
//! ```json
//! [
//!   { "name": "k8s-pod-network", "ips": ["10.128.2.15"], "default": true },
//!   { "name": "default/multi-nic", "interface": "net1", "ips": ["192.168.0.10", "192.168.1.10"] }
//! ]
//! ```
//!
//! The default pod network and management interfaces are dropped. Each IP of the remaining
//! attachments becomes one interface named `{interface}-{i}`, so a single multi-homed
//! `net1` attachment yields `net1-0`, `net1-1`, ...

use std::net::IpAddr;

use log::{debug, warn};
use netmesh_common::{Interface, FALLBACK_INTERFACE_NAME, MANAGEMENT_INTERFACES};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct NetworkStatusEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    interface: Option<String>,
    #[serde(default)]
    ips: Vec<String>,
    #[serde(default)]
    default: bool,
}

impl NetworkStatusEntry {
    fn data_plane_interface(&self) -> Option<&str> {
        if self.default {
            return None;
        }
        self.interface
            .as_deref()
            .filter(|iface| !MANAGEMENT_INTERFACES.contains(iface))
    }
}

/// Parse the annotation into data-plane interfaces.
///
/// Unparseable addresses are skipped, an unparseable document is an error.
pub fn parse_network_status(annotation: &str) -> Result<Vec<Interface>, serde_json::Error> {
    let entries: Vec<NetworkStatusEntry> = serde_json::from_str(annotation)?;

    let mut interfaces = Vec::new();
    for entry in &entries {
        let Some(iface) = entry.data_plane_interface() else {
            debug!(
                "Skipping attachment {:?} ({:?})",
                entry.name.as_deref().unwrap_or("unnamed"),
                entry.interface
            );
            continue;
        };

        for (i, ip) in entry.ips.iter().enumerate() {
            match ip.parse::<IpAddr>() {
                Ok(address) => interfaces.push(Interface::new(format!("{iface}-{i}"), address)),
                Err(e) => warn!("Ignoring address {ip:?} on {iface}: {e}"),
            }
        }
    }

    Ok(interfaces)
}

/// Interfaces for a node, falling back to its primary pod address.
///
/// A node without usable annotations still takes part as a single-interface node.
pub fn interfaces_or_fallback(
    node: &str,
    annotation: Option<&str>,
    primary: IpAddr,
) -> Vec<Interface> {
    let parsed = match annotation {
        Some(raw) => parse_network_status(raw).unwrap_or_else(|e| {
            warn!("Unreadable network-status annotation on {node}: {e}");
            Vec::new()
        }),
        None => {
            debug!("No network-status annotation on {node}");
            Vec::new()
        }
    };

    if parsed.is_empty() {
        warn!("No data-plane interfaces on {node}, using primary address {primary}");
        vec![Interface::new(FALLBACK_INTERFACE_NAME, primary)]
    } else {
        parsed
    }
}
