//! Declarative network topologies for Diorama.
//!
//! An operator describes a network as a YAML or JSON document containing
//! explicitly-declared `single_nodes` and parametric `node_groups`. This crate
//! validates such documents, expands groups into a flat list of [`Node`]s with
//! symmetric peer sets, and keeps the per-edge [`ConnectionParameters`] map
//! consistent with the node set as the topology is edited.
//!
//! Everything here is pure data manipulation; persistence and container
//! orchestration live in the sibling crates.

pub mod config;
pub mod document;
pub mod expand;
pub mod node;
pub mod params;
pub mod program;
pub mod validate;

pub use config::CustomConfig;
pub use document::{RawTopology, TopologyLanguage};
pub use expand::{NodeGroup, set_self_connections, unpack};
pub use node::{Node, NodeAddress};
pub use params::{ConnectionParameters, ConnectionParametersMap};
pub use program::{CodeSource, Program, Runtime};
pub use validate::{TopologyError, ValidatedTopology, validate};
