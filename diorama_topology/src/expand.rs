//! Expansion of structured node groups into flat node lists.
//!
//! Each group seeds a minimal set of directed connections (a line seeds each
//! node with its predecessor, a star seeds each host with the hub, ...); the
//! final symmetrisation pass over the whole list makes the peer relation
//! symmetric, so seeds only ever need to cover one direction of an edge.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::node::Node;
use crate::validate::{TopologyError, ValidatedTopology};

/// A parametric group of nodes. The `type` field of the document entry is
/// the discriminator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeGroup {
    Line(ChainGroup),
    Ring(ChainGroup),
    FullyConnected(ChainGroup),
    Star(StarGroup),
    Tree(TreeGroup),
}

/// Shared shape of the generated-sequence groups (line, ring,
/// fully-connected): `number_nodes` nids generated as
/// `{prefix}{starting_number + i * increment}{suffix}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainGroup {
    pub number_nodes: usize,
    pub program: String,
    #[serde(default)]
    pub nid_prefix: String,
    #[serde(default)]
    pub nid_suffix: String,
    #[serde(default)]
    pub nid_starting_number: i64,
    #[serde(default = "default_increment")]
    pub nid_number_increment: i64,
    #[serde(default)]
    pub connections: Vec<ExtraConnection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StarGroup {
    pub hub_nid: String,
    pub hub_program: String,
    pub number_hosts: usize,
    pub host_program: String,
    #[serde(default)]
    pub host_nid_prefix: String,
    #[serde(default)]
    pub host_nid_suffix: String,
    #[serde(default)]
    pub host_nid_starting_number: i64,
    #[serde(default = "default_increment")]
    pub host_nid_number_increment: i64,
    #[serde(default)]
    pub connections: Vec<ExtraConnection>,
}

/// A complete `number_children`-ary tree of `number_levels` levels. The
/// per-level lists (`programs` is mandatory, the nid ones optional) are
/// indexed by level, root first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TreeGroup {
    pub number_levels: usize,
    pub number_children: usize,
    pub programs: Vec<String>,
    #[serde(default)]
    pub nid_prefixes: Vec<String>,
    #[serde(default)]
    pub nid_suffixes: Vec<String>,
    #[serde(default)]
    pub nid_starting_numbers: Vec<i64>,
    #[serde(default)]
    pub nid_number_increments: Vec<i64>,
    #[serde(default)]
    pub connections: Vec<ExtraConnection>,
}

/// An extra edge declared inside a group, applied bidirectionally to two of
/// that group's nodes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtraConnection {
    pub from: String,
    pub to: String,
}

fn default_increment() -> i64 {
    1
}

impl NodeGroup {
    fn extra_connections(&self) -> &[ExtraConnection] {
        match self {
            NodeGroup::Line(g) | NodeGroup::Ring(g) | NodeGroup::FullyConnected(g) => {
                &g.connections
            }
            NodeGroup::Star(g) => &g.connections,
            NodeGroup::Tree(g) => &g.connections,
        }
    }
}

fn generated_nid(prefix: &str, suffix: &str, start: i64, increment: i64, index: usize) -> String {
    format!("{prefix}{}{suffix}", start + index as i64 * increment)
}

fn chain_nids(group: &ChainGroup) -> Vec<String> {
    (0..group.number_nodes)
        .map(|i| {
            generated_nid(
                &group.nid_prefix,
                &group.nid_suffix,
                group.nid_starting_number,
                group.nid_number_increment,
                i,
            )
        })
        .collect()
}

fn expand_line(group: &ChainGroup) -> Vec<Node> {
    let nids = chain_nids(group);
    nids.iter()
        .enumerate()
        .map(|(i, nid)| {
            let node = Node::new(nid, &group.program);
            if i > 0 {
                node.with_connections([nids[i - 1].clone()])
            } else {
                node
            }
        })
        .collect()
}

fn expand_ring(group: &ChainGroup) -> Vec<Node> {
    let mut nodes = expand_line(group);
    if let [first, .., last] = &mut nodes[..] {
        let last_nid = last.nid.clone();
        first.connections.insert(last_nid);
    } else if let [only] = &mut nodes[..] {
        let nid = only.nid.clone();
        only.connections.insert(nid);
    }
    nodes
}

fn expand_fully_connected(group: &ChainGroup) -> Vec<Node> {
    let nids = chain_nids(group);
    nids.iter()
        .enumerate()
        .map(|(i, nid)| {
            Node::new(nid, &group.program).with_connections(nids[i + 1..].iter().cloned())
        })
        .collect()
}

fn expand_star(group: &StarGroup) -> Vec<Node> {
    let mut nodes = vec![Node::new(&group.hub_nid, &group.hub_program)];
    nodes.extend((0..group.number_hosts).map(|i| {
        let nid = generated_nid(
            &group.host_nid_prefix,
            &group.host_nid_suffix,
            group.host_nid_starting_number,
            group.host_nid_number_increment,
            i,
        );
        Node::new(nid, &group.host_program).with_connections([group.hub_nid.clone()])
    }));
    nodes
}

fn expand_tree(group: &TreeGroup) -> Result<Vec<Node>, TopologyError> {
    if group.programs.len() != group.number_levels {
        return Err(TopologyError::Parsing(format!(
            "tree group declares {} levels but {} programs",
            group.number_levels,
            group.programs.len()
        )));
    }

    let mut nodes: Vec<Node> = Vec::new();
    let mut previous_level: Vec<String> = Vec::new();
    for level in 0..group.number_levels {
        let prefix = group.nid_prefixes.get(level).map(String::as_str).unwrap_or("");
        let suffix = group.nid_suffixes.get(level).map(String::as_str).unwrap_or("");
        let start = group.nid_starting_numbers.get(level).copied().unwrap_or(0);
        let increment = group.nid_number_increments.get(level).copied().unwrap_or(1);

        let width = group.number_children.pow(level as u32);
        let level_nids: Vec<String> = (0..width)
            .map(|i| generated_nid(prefix, suffix, start, increment, i))
            .collect();

        for (i, nid) in level_nids.iter().enumerate() {
            let node = Node::new(nid, &group.programs[level]);
            let node = if level > 0 {
                node.with_connections([previous_level[i / group.number_children].clone()])
            } else {
                node
            };
            nodes.push(node);
        }
        previous_level = level_nids;
    }
    Ok(nodes)
}

fn apply_extra_connections(
    nodes: &mut [Node],
    connections: &[ExtraConnection],
) -> Result<(), TopologyError> {
    for edge in connections {
        for (a, b) in [(&edge.from, &edge.to), (&edge.to, &edge.from)] {
            let node = nodes
                .iter_mut()
                .find(|node| node.nid == *a)
                .ok_or_else(|| {
                    TopologyError::Parsing(format!(
                        "group connection references unknown nid `{a}`"
                    ))
                })?;
            node.connections.insert(b.clone());
        }
    }
    Ok(())
}

fn expand_group(group: &NodeGroup) -> Result<Vec<Node>, TopologyError> {
    let mut nodes = match group {
        NodeGroup::Line(g) => expand_line(g),
        NodeGroup::Ring(g) => expand_ring(g),
        NodeGroup::FullyConnected(g) => expand_fully_connected(g),
        NodeGroup::Star(g) => expand_star(g),
        NodeGroup::Tree(g) => expand_tree(g)?,
    };
    apply_extra_connections(&mut nodes, group.extra_connections())?;
    Ok(nodes)
}

/// Add or strip self-edges on every node in place.
pub fn set_self_connections(nodes: &mut [Node], enabled: bool) {
    for node in nodes {
        if enabled {
            node.connections.insert(node.nid.clone());
        } else {
            node.connections.remove(&node.nid);
        }
    }
}

/// Expand a validated topology into the flat node list.
///
/// Single nodes come first in declaration order, then each group's nodes in
/// declaration order. Self-edges are added before the symmetrisation pass
/// when `self_connected` is set.
pub fn unpack(
    topology: &ValidatedTopology,
    self_connected: bool,
) -> Result<Vec<Node>, TopologyError> {
    let mut nodes = topology.single_nodes.clone();
    for group in &topology.node_groups {
        nodes.extend(expand_group(group)?);
    }

    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.nid.clone(), i).is_some() {
            return Err(TopologyError::Parsing(format!(
                "duplicate nid `{}` in expanded topology",
                node.nid
            )));
        }
    }

    if self_connected {
        set_self_connections(&mut nodes, true);
    }

    let mut reverse_edges: Vec<(usize, String)> = Vec::new();
    for node in &nodes {
        for peer in &node.connections {
            let peer_index = *index.get(peer).ok_or_else(|| {
                TopologyError::Parsing(format!(
                    "node `{}` references unknown peer `{peer}`",
                    node.nid
                ))
            })?;
            reverse_edges.push((peer_index, node.nid.clone()));
        }
    }
    for (peer_index, nid) in reverse_edges {
        nodes[peer_index].connections.insert(nid);
    }

    Ok(nodes)
}
