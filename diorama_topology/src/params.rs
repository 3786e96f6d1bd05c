//! Per-edge connection parameters.
//!
//! The canonical-edge map is the source of truth: an undirected edge
//! `{a, b}` is stored exactly once, keyed `from -> to` with
//! `from = min(a, b)`. The symmetric per-node view handed to the
//! orchestrator is derived from it on demand.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Tunable behaviour of one edge, interpreted by the runtime glue inside the
/// node containers. The delay-distribution vocabulary belongs to that glue,
/// so the tag and its parameters are stored structurally but opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParameters {
    pub success_rate: f64,
    pub delay_distribution: String,
    pub delay_distribution_parameters: serde_json::Value,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        ConnectionParameters {
            success_rate: 1.0,
            delay_distribution: "constant".to_owned(),
            delay_distribution_parameters: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Canonical edge -> parameters, stored as `from -> to -> parameters` with
/// `from <= to`.
pub type ConnectionParametersMap = BTreeMap<String, BTreeMap<String, ConnectionParameters>>;

/// Order an unordered node pair into its canonical `(from, to)` form.
pub fn canonical_edge(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_owned(), b.to_owned())
    } else {
        (b.to_owned(), a.to_owned())
    }
}

/// The set of canonical edges present in a node list, including self-edges.
pub fn canonical_edges(nodes: &[Node]) -> BTreeSet<(String, String)> {
    let mut edges = BTreeSet::new();
    for node in nodes {
        for peer in &node.connections {
            edges.insert(canonical_edge(&node.nid, peer));
        }
    }
    edges
}

/// Bring the parameter map in line with a freshly-saved topology: edges that
/// no longer exist are dropped, new edges get default parameters, and
/// surviving edges keep whatever the operator saved.
pub fn reconcile(map: &mut ConnectionParametersMap, nodes: &[Node]) {
    let edges = canonical_edges(nodes);

    for (from, inner) in map.iter_mut() {
        inner.retain(|to, _| edges.contains(&(from.clone(), to.clone())));
    }
    map.retain(|_, inner| !inner.is_empty());

    for (from, to) in edges {
        map.entry(from)
            .or_default()
            .entry(to)
            .or_insert_with(ConnectionParameters::default);
    }
}

/// Write parameters for one edge under its canonical key; `from > to` is
/// accepted by swapping.
pub fn set_edge_parameters(
    map: &mut ConnectionParametersMap,
    from: &str,
    to: &str,
    parameters: ConnectionParameters,
) {
    let (from, to) = canonical_edge(from, to);
    map.entry(from).or_default().insert(to, parameters);
}

/// The symmetric view: for each node, its peers and the parameters of the
/// edge between them. Both endpoints see every edge; a self-edge appears
/// once under its own node.
pub fn parameters_by_node(
    map: &ConnectionParametersMap,
) -> BTreeMap<String, BTreeMap<String, ConnectionParameters>> {
    let mut by_node: BTreeMap<String, BTreeMap<String, ConnectionParameters>> = BTreeMap::new();
    for (from, inner) in map {
        for (to, parameters) in inner {
            by_node
                .entry(from.clone())
                .or_default()
                .insert(to.clone(), parameters.clone());
            by_node
                .entry(to.clone())
                .or_default()
                .insert(from.clone(), parameters.clone());
        }
    }
    by_node
}
