//! The simulation lifecycle state machine.
//!
//! At most one simulation is ever materialised per process. Setup advances
//! linearly through the states; any engine failure rolls the cluster back
//! through the same reset path an operator-requested reset uses. The inputs
//! that drove the materialised cluster are frozen in a [`SimulationSnapshot`]
//! at setup time and govern it until reset, so cleanup always targets what
//! was actually created rather than whatever the topology says now.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use diorama_store::{Record, Store};
use diorama_topology::{
    CodeSource, CustomConfig, Node, NodeAddress, Program, Runtime, params, set_self_connections,
};

use crate::context::{self, NODE_MAIN_FILE_NAME_FOR_RAW};
use crate::docker::{ContainerBackend, ContainerSpec, LogChunkStream, NodeAction, parse_log};
use crate::{LogEntry, catalog};

/// Name of the bridge network all node containers attach to.
pub const NETWORK_NAME: &str = "DIORAMA_NETWORK";

/// The orchestrator's observable state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationState {
    #[default]
    Uninitialised,
    Initialising,
    CreatingNetwork,
    CreatingImages,
    CreatingNodes,
    ReadyToRun,
    Running,
    Resetting,
}

impl std::fmt::Display for SimulationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SimulationState::Uninitialised => "UNINITIALISED",
            SimulationState::Initialising => "INITIALISING",
            SimulationState::CreatingNetwork => "CREATING_NETWORK",
            SimulationState::CreatingImages => "CREATING_IMAGES",
            SimulationState::CreatingNodes => "CREATING_NODES",
            SimulationState::ReadyToRun => "READY_TO_RUN",
            SimulationState::Running => "RUNNING",
            SimulationState::Resetting => "RESETTING",
        };
        f.write_str(name)
    }
}

/// The frozen inputs of the currently-materialised cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub node_list: Vec<Node>,
    pub program_list: Vec<Program>,
    pub config: Option<CustomConfig>,
    pub node_addresses: Vec<NodeAddress>,
    pub state: SimulationState,
}

impl Record for SimulationSnapshot {
    const FILE_NAME: &'static str = "simulation.json";
}

/// Pushed to subscribers as the cluster changes.
#[derive(Debug, Clone)]
pub enum SimulationEvent {
    StateChanged(SimulationState),
    Logs { nid: String, entries: Vec<LogEntry> },
}

/// One row of the operator's node table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationNodeRow {
    pub nid: String,
    pub status: String,
    pub program: String,
    pub runtime: Runtime,
    pub description: String,
}

/// What `streamNodeLogs` asked for.
#[derive(Debug, Clone)]
pub enum LogStreamTarget {
    All,
    Node { nid: String, since: Option<i64> },
}

enum SetupError {
    Cancelled,
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for SetupError {
    fn from(error: anyhow::Error) -> Self {
        SetupError::Failed(error)
    }
}

pub struct Simulation {
    store: Store,
    backend: Arc<dyn ContainerBackend>,
    base_files_dir: PathBuf,
    events: broadcast::Sender<SimulationEvent>,
    /// Serialises setup and reset bodies against each other.
    lifecycle: tokio::sync::Mutex<()>,
    setup_running: AtomicBool,
    reset_requested: AtomicBool,
}

impl Simulation {
    pub fn new(
        store: Store,
        backend: Arc<dyn ContainerBackend>,
        base_files_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Simulation {
            store,
            backend,
            base_files_dir: base_files_dir.into(),
            events,
            lifecycle: tokio::sync::Mutex::new(()),
            setup_running: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimulationEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> Result<SimulationState> {
        Ok(self.snapshot()?.state)
    }

    fn snapshot(&self) -> Result<SimulationSnapshot> {
        Ok(self
            .store
            .get_singleton::<SimulationSnapshot>()?
            .unwrap_or_default())
    }

    fn publish_state(&self, state: SimulationState) {
        let _ = self.events.send(SimulationEvent::StateChanged(state));
    }

    /// Run the whole setup sequence on the current task. Rejected (with a
    /// warning, no state change) while another setup is in flight; normally
    /// driven via [`Simulation::spawn_set_up`] so the caller's event loop
    /// stays responsive.
    pub async fn set_up(&self) {
        if self.setup_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("a simulation setup is already in progress; ignoring setUpSimulation");
            return;
        }
        let _guard = self.lifecycle.lock().await;
        self.publish_state(SimulationState::Initialising);
        match self.try_set_up().await {
            Ok(()) => tracing::info!("simulation is ready to run"),
            Err(SetupError::Cancelled) => {
                // The pending reset owns the rollback.
                tracing::info!("simulation setup aborted by a reset request");
            }
            Err(SetupError::Failed(error)) => {
                tracing::error!("simulation setup failed, rolling back: {error:#}");
                if let Err(error) = self.reset_inner().await {
                    tracing::error!("rollback after failed setup also failed: {error:#}");
                }
            }
        }
        self.setup_running.store(false, Ordering::SeqCst);
    }

    pub fn spawn_set_up(self: Arc<Self>) {
        tokio::spawn(async move { self.set_up().await });
    }

    /// Tear the cluster down and return to UNINITIALISED. Safe to call at
    /// any time, including while a setup is in flight: the setup observes
    /// the pending reset at its next step boundary and stops publishing, and
    /// the reset then runs to completion. Idempotent.
    pub async fn stop_and_reset(&self) -> Result<()> {
        self.reset_requested.store(true, Ordering::SeqCst);
        let _guard = self.lifecycle.lock().await;
        self.reset_requested.store(false, Ordering::SeqCst);
        self.reset_inner().await
    }

    async fn reset_inner(&self) -> Result<()> {
        let mut snapshot = self.snapshot()?;
        snapshot.state = SimulationState::Resetting;
        self.store.put_singleton(&snapshot)?;
        self.publish_state(SimulationState::Resetting);

        self.clean(&snapshot).await?;
        self.store.remove_singleton::<SimulationSnapshot>()?;

        self.publish_state(SimulationState::Uninitialised);
        Ok(())
    }

    /// Remove every engine object the last snapshot created: containers
    /// named by nid, images tagged by program name, and the bridge network.
    /// NotFound is not an error, so this is safe however far a setup got.
    async fn clean(&self, snapshot: &SimulationSnapshot) -> Result<()> {
        let nids: Vec<String> = snapshot.node_list.iter().map(|n| n.nid.clone()).collect();
        let images: Vec<String> = snapshot
            .program_list
            .iter()
            .map(|p| p.name.clone())
            .collect();
        self.backend.remove_containers(&nids).await?;
        self.backend.remove_images(&images).await?;
        self.backend.remove_network(NETWORK_NAME).await?;
        Ok(())
    }

    fn check_reset_pending(&self) -> Result<(), SetupError> {
        if self.reset_requested.load(Ordering::SeqCst) {
            Err(SetupError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn advance(
        &self,
        snapshot: &mut SimulationSnapshot,
        state: SimulationState,
    ) -> Result<(), SetupError> {
        self.check_reset_pending()?;
        snapshot.state = state;
        self.store.put_singleton(snapshot).map_err(SetupError::Failed)?;
        self.publish_state(state);
        Ok(())
    }

    async fn try_set_up(&self) -> Result<(), SetupError> {
        let previous = self.snapshot()?;
        self.clean(&previous).await?;
        self.store.remove_singleton::<SimulationSnapshot>()?;

        let config = self.store.custom_config()?;
        let mut node_list = self.store.topology()?.unpacked;
        if config.self_connected_nodes {
            set_self_connections(&mut node_list, true);
        }

        let mut program_list = self.store.programs()?;
        for program in &mut program_list {
            if program.code_source == CodeSource::Raw {
                program.main_handler =
                    format!("{NODE_MAIN_FILE_NAME_FOR_RAW}.{}", program.main_handler);
            }
        }

        let node_addresses = assign_node_addresses(&node_list, &config)?;
        let mut snapshot = SimulationSnapshot {
            node_list,
            program_list,
            config: Some(config.clone()),
            node_addresses,
            state: SimulationState::Initialising,
        };
        self.store.put_singleton(&snapshot)?;

        self.advance(&mut snapshot, SimulationState::CreatingNetwork)?;
        self.backend
            .create_network(NETWORK_NAME, &config.network_subnet)
            .await?;

        self.advance(&mut snapshot, SimulationState::CreatingImages)?;
        self.create_program_images(&snapshot).await?;

        self.advance(&mut snapshot, SimulationState::CreatingNodes)?;
        self.create_node_containers(&snapshot).await?;

        self.advance(&mut snapshot, SimulationState::ReadyToRun)?;
        Ok(())
    }

    async fn create_program_images(
        &self,
        snapshot: &SimulationSnapshot,
    ) -> Result<(), SetupError> {
        let parameters =
            params::parameters_by_node(&self.store.topology()?.connection_parameters);
        for program in &snapshot.program_list {
            self.check_reset_pending()?;
            let build_context = context::materialize_build_context(
                program,
                &snapshot.node_addresses,
                &parameters,
                &self.base_files_dir,
                &self.store,
            )?;
            self.backend
                .build_image(build_context.path(), &program.name)
                .await?;
        }
        Ok(())
    }

    async fn create_node_containers(
        &self,
        snapshot: &SimulationSnapshot,
    ) -> Result<(), SetupError> {
        let programs_by_name: HashMap<&str, &Program> = snapshot
            .program_list
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();
        let addresses_by_nid: HashMap<&str, &NodeAddress> = snapshot
            .node_addresses
            .iter()
            .map(|a| (a.nid.as_str(), a))
            .collect();

        for node in &snapshot.node_list {
            self.check_reset_pending()?;
            let program = programs_by_name
                .get(node.program.as_str())
                .with_context(|| {
                    format!("node `{}` references unknown program `{}`", node.nid, node.program)
                })?;
            let address = addresses_by_nid
                .get(node.nid.as_str())
                .with_context(|| format!("node `{}` has no assigned address", node.nid))?;
            let launch = catalog::launch_spec(program.runtime).with_context(|| {
                format!("runtime `{}` has no launch command in the catalog", program.runtime)
            })?;

            let peer_csv = node
                .connections
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            let mut command: Vec<String> =
                launch.run_command.iter().map(|s| (*s).to_owned()).collect();
            command.extend([
                peer_csv,
                node.nid.clone(),
                address.port.to_string(),
                program.main_handler.clone(),
            ]);

            self.backend
                .create_container(&ContainerSpec {
                    name: node.nid.clone(),
                    image: program.name.clone(),
                    command,
                    working_dir: launch.working_dir.to_owned(),
                    ip_address: address.ip_address,
                    udp_ports: vec![address.port],
                    network: NETWORK_NAME.to_owned(),
                })
                .await?;
        }
        Ok(())
    }

    /// The operator's node table: empty unless the cluster is materialised,
    /// otherwise one row per node joining topology, program metadata and a
    /// fresh engine status. Containers the engine no longer lists show up as
    /// `"missing"`.
    pub async fn simulation_nodes(&self) -> Result<Vec<SimulationNodeRow>> {
        let snapshot = self.snapshot()?;
        if !matches!(
            snapshot.state,
            SimulationState::ReadyToRun | SimulationState::Running
        ) {
            return Ok(Vec::new());
        }

        let nids: Vec<String> = snapshot.node_list.iter().map(|n| n.nid.clone()).collect();
        let statuses = self.backend.container_statuses(&nids).await?;
        let programs_by_name: HashMap<&str, &Program> = snapshot
            .program_list
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        let mut rows = Vec::with_capacity(snapshot.node_list.len());
        for node in &snapshot.node_list {
            let program = programs_by_name
                .get(node.program.as_str())
                .with_context(|| format!("snapshot is missing program `{}`", node.program))?;
            rows.push(SimulationNodeRow {
                nid: node.nid.clone(),
                status: statuses
                    .get(&node.nid)
                    .cloned()
                    .unwrap_or_else(|| "missing".to_owned()),
                program: program.name.clone(),
                runtime: program.runtime,
                description: program.description.clone(),
            });
        }
        Ok(rows)
    }

    /// Forward a lifecycle action to the engine and track the cluster-level
    /// start/stop arc between READY_TO_RUN and RUNNING.
    pub async fn perform_node_action(&self, nid: &str, action: NodeAction) -> Result<()> {
        self.backend.container_action(nid, action).await?;

        let mut snapshot = self.snapshot()?;
        let next = match (snapshot.state, action) {
            (
                SimulationState::ReadyToRun,
                NodeAction::Start | NodeAction::Restart | NodeAction::Unpause,
            ) => Some(SimulationState::Running),
            (
                SimulationState::Running,
                NodeAction::Stop | NodeAction::Kill | NodeAction::Pause,
            ) => Some(SimulationState::ReadyToRun),
            _ => None,
        };
        if let Some(state) = next {
            snapshot.state = state;
            self.store.put_singleton(&snapshot)?;
            self.publish_state(state);
        }
        Ok(())
    }

    /// Start follow-mode log pumps for one node or all of them; chunks are
    /// parsed and pushed to subscribers as [`SimulationEvent::Logs`].
    pub async fn stream_node_logs(&self, target: LogStreamTarget) -> Result<()> {
        let targets: Vec<(String, Option<i64>)> = match target {
            LogStreamTarget::All => self
                .snapshot()?
                .node_list
                .iter()
                .map(|node| (node.nid.clone(), None))
                .collect(),
            LogStreamTarget::Node { nid, since } => vec![(nid, since)],
        };

        for (nid, since) in targets {
            let stream = self.backend.container_logs(&nid, since).await?;
            tokio::spawn(pump_logs(stream, nid, self.events.clone()));
        }
        Ok(())
    }
}

async fn pump_logs(
    mut stream: LogChunkStream,
    nid: String,
    events: broadcast::Sender<SimulationEvent>,
) {
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let entries = parse_log(&bytes);
                if !entries.is_empty() {
                    let _ = events.send(SimulationEvent::Logs {
                        nid: nid.clone(),
                        entries,
                    });
                }
            }
            Err(error) => {
                tracing::debug!(%nid, "log stream ended: {error:#}");
                break;
            }
        }
    }
}

/// Node `i` (declaration order) gets `base_ip + i`; every node shares the
/// configured UDP base port.
pub fn assign_node_addresses(
    nodes: &[Node],
    config: &CustomConfig,
) -> Result<Vec<NodeAddress>> {
    let base = u32::from(config.base_ip_address);
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let ip = base
                .checked_add(index as u32)
                .context("node address space exhausted")?;
            Ok(NodeAddress {
                nid: node.nid.clone(),
                ip_address: Ipv4Addr::from(ip),
                port: config.base_port,
            })
        })
        .collect()
}
