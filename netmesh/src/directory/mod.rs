//! Node discovery
//!
//! A [`Directory`] resolves a [`NodeSelection`] into the participating nodes with their
//! control endpoints and data-plane interfaces. Selections compose by union: explicit
//! names, node label selectors and workload-derived filters. A selection with none of
//! them means every node the directory knows.
//!
//! Resolution never has side effects. An empty result is an error: callers abort instead
//! of mesh-testing zero nodes.

mod inventory;
#[cfg(feature = "kubernetes")]
pub mod kubernetes;
pub mod network_status;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    str::FromStr,
};

pub use inventory::InventoryDirectory;
use log::warn;
use netmesh_common::Node;

use crate::error::DirectoryError;

/// Resolved nodes keyed by name.
///
/// Iteration order (by name) is the node order of the run.
pub type NodeMap = BTreeMap<String, Node>;

/// Source of participating nodes
pub trait Directory {
    fn resolve(
        &self,
        selection: &NodeSelection,
    ) -> impl Future<Output = Result<NodeMap, DirectoryError>> + Send;
}

/// One label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::NotExists(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{k}={v}"),
            Self::NotEquals(k, v) => write!(f, "{k}!={v}"),
            Self::Exists(k) => write!(f, "{k}"),
            Self::NotExists(k) => write!(f, "!{k}"),
        }
    }
}

/// Equality-based label selector, e.g. `app=autopilot,tier!=cpu,gpu`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// All requirements hold.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| DirectoryError::invalid_selector(s, message);
        let valid_key = |k: &str| {
            !k.is_empty()
                && k.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        };

        let mut requirements = Vec::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else {
                Requirement::Exists(term.to_string())
            };

            let key = match &requirement {
                Requirement::Equals(k, _)
                | Requirement::NotEquals(k, _)
                | Requirement::Exists(k)
                | Requirement::NotExists(k) => k,
            };
            if !valid_key(key) {
                return Err(invalid(&format!("bad label key {key:?}")));
            }
            requirements.push(requirement);
        }

        if requirements.is_empty() {
            return Err(invalid("no requirements"));
        }
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

/// Nodes running pods that match a namespace and label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSelector {
    pub namespace: String,
    pub selector: LabelSelector,
}

impl FromStr for WorkloadSelector {
    type Err = DirectoryError;

    /// Parses `namespace:selector`, e.g. `default:job-name=my-job`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, selector) = s
            .split_once(':')
            .ok_or_else(|| DirectoryError::invalid_selector(s, "expected namespace:selector"))?;
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(DirectoryError::invalid_selector(s, "empty namespace"));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            selector: selector.parse()?,
        })
    }
}

impl fmt::Display for WorkloadSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.selector)
    }
}

/// Which nodes take part in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSelection {
    pub names: Vec<String>,
    pub labels: Vec<LabelSelector>,
    pub workloads: Vec<WorkloadSelector>,
}

impl NodeSelection {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.names.is_empty() && self.labels.is_empty() && self.workloads.is_empty()
    }

    /// Build a selection from CLI-style arguments.
    ///
    /// `nodes` is `all` or a comma-separated name list; `all` only applies when no other
    /// filter is given.
    pub fn from_args(
        nodes: &str,
        labels: Option<&str>,
        job: Option<&str>,
    ) -> Result<Self, DirectoryError> {
        let names = nodes
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != "all")
            .map(str::to_string)
            .collect();

        Ok(Self {
            names,
            labels: labels
                .map(str::parse::<LabelSelector>)
                .transpose()?
                .into_iter()
                .collect(),
            workloads: job
                .map(str::parse::<WorkloadSelector>)
                .transpose()?
                .into_iter()
                .collect(),
        })
    }
}

impl fmt::Display for NodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            return f.write_str("all nodes");
        }
        let mut parts = Vec::new();
        if !self.names.is_empty() {
            parts.push(format!("nodes [{}]", self.names.join(",")));
        }
        for selector in &self.labels {
            parts.push(format!("labels [{selector}]"));
        }
        for workload in &self.workloads {
            parts.push(format!("workload [{workload}]"));
        }
        f.write_str(&parts.join(" + "))
    }
}

/// Names picked by `selection` out of the known nodes.
///
/// `labels_of` gives the labels of a known node; `workload_nodes` the nodes hosting pods
/// matched by a workload selector. Unknown explicit names are warned about and dropped.
pub(crate) fn select_names<'a, L, W>(
    selection: &NodeSelection,
    known: impl IntoIterator<Item = &'a str>,
    labels_of: L,
    mut workload_nodes: W,
) -> Result<BTreeSet<String>, DirectoryError>
where
    L: Fn(&str) -> Option<&'a BTreeMap<String, String>>,
    W: FnMut(&WorkloadSelector) -> Result<BTreeSet<String>, DirectoryError>,
{
    let known: BTreeSet<&str> = known.into_iter().collect();

    if selection.is_all() {
        return Ok(known.into_iter().map(str::to_string).collect());
    }

    let mut selected = BTreeSet::new();

    for name in &selection.names {
        if known.contains(name.as_str()) {
            selected.insert(name.clone());
        } else {
            warn!("Requested node {name} is not running an agent, it will not be tested");
        }
    }

    for selector in &selection.labels {
        selected.extend(
            known
                .iter()
                .filter(|name| labels_of(name).is_some_and(|labels| selector.matches(labels)))
                .map(|name| (*name).to_string()),
        );
    }

    for workload in &selection.workloads {
        for name in workload_nodes(workload)? {
            if known.contains(name.as_str()) {
                selected.insert(name);
            } else {
                warn!("Node {name} hosts workload {workload} but runs no agent, skipping");
            }
        }
    }

    Ok(selected)
}
