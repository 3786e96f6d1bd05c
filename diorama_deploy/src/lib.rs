//! Materialising a Diorama topology as a cluster of containers.
//!
//! [`simulation::Simulation`] drives the lifecycle state machine; it talks to
//! the host container engine through the [`docker::ContainerBackend`] seam,
//! assembles per-program build contexts via [`context`], and looks launch
//! details up in the static [`catalog`].

pub mod catalog;
pub mod context;
pub mod docker;
pub mod simulation;

pub use docker::{ContainerBackend, ContainerSpec, DockerBackend, LogEntry, NodeAction, parse_log};
pub use simulation::{
    LogStreamTarget, NETWORK_NAME, Simulation, SimulationEvent, SimulationNodeRow,
    SimulationSnapshot, SimulationState,
};
