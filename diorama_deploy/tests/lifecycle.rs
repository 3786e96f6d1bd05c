//! Lifecycle tests against a fake container backend: the state trajectory of
//! a successful setup, rollback on engine failure, reset idempotency, and
//! the node-table join.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use diorama_deploy::{
    ContainerBackend, ContainerSpec, NodeAction, Simulation, SimulationEvent, SimulationState,
};
use diorama_deploy::docker::LogChunkStream;
use diorama_store::{Store, TopologyRecord};
use diorama_topology::{
    CodeSource, CustomConfig, Program, Runtime, TopologyLanguage, params, validate,
};

#[derive(Default)]
struct FakeBackend {
    fail_on_build: bool,
    containers: Mutex<BTreeSet<String>>,
    images: Mutex<BTreeSet<String>>,
    network: Mutex<Option<String>>,
    container_specs: Mutex<Vec<ContainerSpec>>,
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<()> {
        assert!(context_dir.join("Dockerfile").exists());
        if self.fail_on_build {
            bail!("injected build failure for `{tag}`");
        }
        self.images.lock().unwrap().insert(tag.to_owned());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<()> {
        self.containers.lock().unwrap().insert(spec.name.clone());
        self.container_specs.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn container_action(&self, _name: &str, _action: NodeAction) -> Result<()> {
        Ok(())
    }

    async fn container_statuses(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let containers = self.containers.lock().unwrap();
        Ok(names
            .iter()
            .filter(|name| containers.contains(*name))
            .map(|name| (name.clone(), "created".to_owned()))
            .collect())
    }

    async fn container_logs(&self, _name: &str, _since: Option<i64>) -> Result<LogChunkStream> {
        Ok(futures::stream::empty().boxed())
    }

    async fn create_network(&self, name: &str, _subnet: &str) -> Result<()> {
        *self.network.lock().unwrap() = Some(name.to_owned());
        Ok(())
    }

    async fn remove_network(&self, _name: &str) -> Result<()> {
        *self.network.lock().unwrap() = None;
        Ok(())
    }

    async fn remove_containers(&self, names: &[String]) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        for name in names {
            containers.remove(name);
        }
        Ok(())
    }

    async fn remove_images(&self, tags: &[String]) -> Result<()> {
        let mut images = self.images.lock().unwrap();
        for tag in tags {
            images.remove(tag);
        }
        Ok(())
    }
}

struct Fixture {
    simulation: Arc<Simulation>,
    backend: Arc<FakeBackend>,
    _store_dir: TempDir,
    _base_files_dir: TempDir,
}

fn fixture(fail_on_build: bool) -> Fixture {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Store::open(store_dir.path()).unwrap();

    store
        .set_custom_config(&CustomConfig {
            self_connected_nodes: false,
            ..Default::default()
        })
        .unwrap();

    store
        .upsert_program(&Program {
            name: "p".to_owned(),
            runtime: Runtime::Python3,
            code_source: CodeSource::Raw,
            code_data: "def handle(msg):\n    pass\n".to_owned(),
            main_handler: "handle".to_owned(),
            description: "a test program".to_owned(),
        })
        .unwrap();

    let topology = validate(
        TopologyLanguage::Yaml,
        "node_groups:\n  - {type: line, number_nodes: 3, nid_prefix: n, program: p}\n",
    )
    .unwrap();
    let unpacked = diorama_topology::unpack(&topology, false).unwrap();
    let mut connection_parameters = Default::default();
    params::reconcile(&mut connection_parameters, &unpacked);
    store
        .set_topology(&TopologyRecord {
            raw: Default::default(),
            unpacked,
            connection_parameters,
        })
        .unwrap();

    let base_files_dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(base_files_dir.path().join("python3")).unwrap();
    fs::write(
        base_files_dir.path().join("python3/Dockerfile"),
        "FROM python:3\n",
    )
    .unwrap();

    let backend = Arc::new(FakeBackend {
        fail_on_build,
        ..Default::default()
    });
    let simulation = Simulation::new(
        store,
        backend.clone() as Arc<dyn ContainerBackend>,
        base_files_dir.path(),
    );

    Fixture {
        simulation,
        backend,
        _store_dir: store_dir,
        _base_files_dir: base_files_dir,
    }
}

fn drain_states(
    receiver: &mut tokio::sync::broadcast::Receiver<SimulationEvent>,
) -> Vec<SimulationState> {
    let mut states = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let SimulationEvent::StateChanged(state) = event {
            states.push(state);
        }
    }
    states
}

#[tokio::test]
async fn setup_walks_the_states_and_materialises_the_cluster() {
    let fixture = fixture(false);
    let mut events = fixture.simulation.subscribe();

    fixture.simulation.set_up().await;

    assert_eq!(
        drain_states(&mut events),
        [
            SimulationState::Initialising,
            SimulationState::CreatingNetwork,
            SimulationState::CreatingImages,
            SimulationState::CreatingNodes,
            SimulationState::ReadyToRun,
        ]
    );
    assert_eq!(
        fixture.simulation.state().unwrap(),
        SimulationState::ReadyToRun
    );

    assert_eq!(
        *fixture.backend.network.lock().unwrap(),
        Some("DIORAMA_NETWORK".to_owned())
    );
    assert!(fixture.backend.images.lock().unwrap().contains("p"));
    assert_eq!(
        fixture
            .backend
            .containers
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect::<Vec<_>>(),
        ["n0", "n1", "n2"]
    );
}

#[tokio::test]
async fn container_commands_carry_peers_port_and_rewritten_handler() {
    let fixture = fixture(false);
    fixture.simulation.set_up().await;

    let specs = fixture.backend.container_specs.lock().unwrap();
    let n1 = specs.iter().find(|s| s.name == "n1").unwrap();
    assert_eq!(
        n1.command,
        ["python", "-u", "main.py", "n0,n2", "n1", "2000", "node.handle"]
    );
    assert_eq!(n1.image, "p");
    assert_eq!(n1.working_dir, "/usr/src/app");
    assert_eq!(n1.udp_ports, [2000]);
    assert_eq!(n1.network, "DIORAMA_NETWORK");

    // base 172.190.0.4, n1 is index 1
    assert_eq!(n1.ip_address.to_string(), "172.190.0.5");
}

#[tokio::test]
async fn failed_image_build_rolls_back_to_uninitialised() {
    let fixture = fixture(true);
    let mut events = fixture.simulation.subscribe();

    fixture.simulation.set_up().await;

    assert_eq!(
        drain_states(&mut events),
        [
            SimulationState::Initialising,
            SimulationState::CreatingNetwork,
            SimulationState::CreatingImages,
            SimulationState::Resetting,
            SimulationState::Uninitialised,
        ]
    );
    assert_eq!(
        fixture.simulation.state().unwrap(),
        SimulationState::Uninitialised
    );
    assert!(fixture.backend.network.lock().unwrap().is_none());
    assert!(fixture.backend.images.lock().unwrap().is_empty());
    assert!(fixture.backend.containers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reset_is_idempotent() {
    let fixture = fixture(false);
    fixture.simulation.set_up().await;
    let mut events = fixture.simulation.subscribe();

    fixture.simulation.stop_and_reset().await.unwrap();
    fixture.simulation.stop_and_reset().await.unwrap();

    let states = drain_states(&mut events);
    assert_eq!(
        states,
        [
            SimulationState::Resetting,
            SimulationState::Uninitialised,
            SimulationState::Resetting,
            SimulationState::Uninitialised,
        ]
    );
    assert_eq!(
        fixture.simulation.state().unwrap(),
        SimulationState::Uninitialised
    );
    assert!(fixture.backend.containers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn node_table_is_empty_unless_materialised() {
    let fixture = fixture(false);
    assert!(fixture.simulation.simulation_nodes().await.unwrap().is_empty());

    fixture.simulation.set_up().await;
    let rows = fixture.simulation.simulation_nodes().await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].nid, "n0");
    assert_eq!(rows[0].status, "created");
    assert_eq!(rows[0].program, "p");
    assert_eq!(rows[0].runtime, Runtime::Python3);
    assert_eq!(rows[0].description, "a test program");

    fixture.simulation.stop_and_reset().await.unwrap();
    assert!(fixture.simulation.simulation_nodes().await.unwrap().is_empty());
}

#[tokio::test]
async fn vanished_containers_show_up_as_missing() {
    let fixture = fixture(false);
    fixture.simulation.set_up().await;

    fixture.backend.containers.lock().unwrap().remove("n1");
    let rows = fixture.simulation.simulation_nodes().await.unwrap();
    let n1 = rows.iter().find(|r| r.nid == "n1").unwrap();
    assert_eq!(n1.status, "missing");
}

#[tokio::test]
async fn node_actions_drive_the_running_arc() {
    let fixture = fixture(false);
    fixture.simulation.set_up().await;
    let mut events = fixture.simulation.subscribe();

    fixture
        .simulation
        .perform_node_action("n0", NodeAction::Start)
        .await
        .unwrap();
    assert_eq!(fixture.simulation.state().unwrap(), SimulationState::Running);

    // Already running: a second start does not re-publish.
    fixture
        .simulation
        .perform_node_action("n1", NodeAction::Start)
        .await
        .unwrap();

    fixture
        .simulation
        .perform_node_action("n0", NodeAction::Stop)
        .await
        .unwrap();
    assert_eq!(
        fixture.simulation.state().unwrap(),
        SimulationState::ReadyToRun
    );

    assert_eq!(
        drain_states(&mut events),
        [SimulationState::Running, SimulationState::ReadyToRun]
    );
}

#[tokio::test]
async fn self_connected_config_adds_self_edges_to_the_snapshot() {
    let fixture = fixture(false);
    {
        // flip the persisted config before setting up
        let store_dir = fixture._store_dir.path();
        let store = Store::open(store_dir).unwrap();
        let mut config = store.custom_config().unwrap();
        config.self_connected_nodes = true;
        store.set_custom_config(&config).unwrap();
    }

    fixture.simulation.set_up().await;

    let specs = fixture.backend.container_specs.lock().unwrap();
    let n0 = specs.iter().find(|s| s.name == "n0").unwrap();
    // peer csv now includes the node itself
    assert_eq!(n0.command[3], "n0,n1");
}
