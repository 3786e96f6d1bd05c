use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// A single simulated node: an identifier, the program it runs, and the set
/// of peers it is wired to.
///
/// `connections` is a [`BTreeSet`] so peer lists are deduplicated and always
/// serialise in a deterministic (sorted) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub nid: String,
    pub program: String,
    #[serde(default)]
    pub connections: BTreeSet<String>,
}

impl Node {
    pub fn new(nid: impl Into<String>, program: impl Into<String>) -> Self {
        Node {
            nid: nid.into(),
            program: program.into(),
            connections: BTreeSet::new(),
        }
    }

    pub fn with_connections<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connections.extend(peers.into_iter().map(Into::into));
        self
    }
}

/// The address assigned to a node when a simulation is materialised.
///
/// Serialised snake_case into `node_addresses.yml`, which the in-container
/// runtime glue reads to find its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub nid: String,
    pub ip_address: Ipv4Addr,
    pub port: u16,
}
