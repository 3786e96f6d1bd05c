//! Dispatch tests over a real store and hub, with the container engine
//! stubbed out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;

use diorama_deploy::docker::LogChunkStream;
use diorama_deploy::{ContainerBackend, ContainerSpec, NodeAction, Simulation};
use diorama_server::{AppState, Hub, dispatch, events, topology};
use diorama_store::Store;
use diorama_topology::{CodeSource, Program, Runtime, TopologyLanguage};

struct NoopBackend;

#[async_trait]
impl ContainerBackend for NoopBackend {
    async fn build_image(&self, _context_dir: &Path, _tag: &str) -> Result<()> {
        Ok(())
    }
    async fn create_container(&self, _spec: &ContainerSpec) -> Result<()> {
        Ok(())
    }
    async fn container_action(&self, _name: &str, _action: NodeAction) -> Result<()> {
        Ok(())
    }
    async fn container_statuses(&self, _names: &[String]) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
    async fn container_logs(&self, _name: &str, _since: Option<i64>) -> Result<LogChunkStream> {
        Ok(futures::stream::empty().boxed())
    }
    async fn create_network(&self, _name: &str, _subnet: &str) -> Result<()> {
        Ok(())
    }
    async fn remove_network(&self, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn remove_containers(&self, _names: &[String]) -> Result<()> {
        Ok(())
    }
    async fn remove_images(&self, _tags: &[String]) -> Result<()> {
        Ok(())
    }
}

fn app_state() -> (TempDir, Arc<AppState>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let simulation = Simulation::new(store.clone(), Arc::new(NoopBackend), dir.path());
    let state = Arc::new(AppState {
        store,
        simulation,
        hub: Hub::new(),
    });
    (dir, state)
}

/// Decode one outbound frame into its event name and payload value.
fn decode(frame: &str) -> (String, serde_json::Value) {
    let value: serde_json::Value = serde_json::from_str(frame).unwrap();
    let event = value["event"].as_str().unwrap().to_owned();
    let data = serde_json::from_str(value["data"].as_str().unwrap()).unwrap();
    (event, data)
}

fn program(name: &str) -> Program {
    Program {
        name: name.to_owned(),
        runtime: Runtime::Python3,
        code_source: CodeSource::Raw,
        code_data: "x = 1".to_owned(),
        main_handler: "handle".to_owned(),
        description: String::new(),
    }
}

#[tokio::test]
async fn program_crud_round_trips_through_events() {
    let (_dir, state) = app_state();
    let mut subscriber = state.hub.register();

    dispatch::handle(&state, events::InboundEvent::AddProgram(program("p")))
        .await
        .unwrap();
    dispatch::handle(&state, events::InboundEvent::GetPrograms)
        .await
        .unwrap();

    let (event, data) = decode(&subscriber.recv().await.unwrap());
    assert_eq!(event, "programs");
    assert_eq!(data[0]["name"], "p");
    assert_eq!(data[0]["codeSource"], "raw");

    let mut modified = program("p");
    modified.description = "updated".to_owned();
    dispatch::handle(&state, events::InboundEvent::ModifyProgram(modified))
        .await
        .unwrap();
    dispatch::handle(&state, events::InboundEvent::DeleteProgram("p".to_owned()))
        .await
        .unwrap();
    assert!(state.store.programs().unwrap().is_empty());
}

#[tokio::test]
async fn get_custom_config_broadcasts_the_lazy_defaults() {
    let (_dir, state) = app_state();
    let mut subscriber = state.hub.register();

    dispatch::handle(&state, events::InboundEvent::GetCustomConfig)
        .await
        .unwrap();

    let (event, data) = decode(&subscriber.recv().await.unwrap());
    assert_eq!(event, "customConfig");
    assert_eq!(data["baseIpAddress"], "172.190.0.4");
    assert_eq!(data["networkSubnet"], "172.190.0.0/16");
    assert_eq!(data["basePort"], 2000);
    assert_eq!(data["selfConnectedNodes"], true);
}

#[tokio::test]
async fn modify_node_connections_writes_the_canonical_edge() {
    let (_dir, state) = app_state();
    topology::save_topology(
        &state.store,
        TopologyLanguage::Yaml,
        "single_nodes:\n  - {nid: aa, program: p, connections: [zz]}\n  - {nid: zz, program: p}\n",
    )
    .unwrap()
    .unwrap();

    let mut subscriber = state.hub.register();
    let parameters = diorama_topology::ConnectionParameters {
        success_rate: 0.5,
        ..Default::default()
    };
    // reversed endpoints: the write must land under (aa, zz)
    dispatch::handle(
        &state,
        events::InboundEvent::ModifyNodeConnections {
            from_nid: "zz".to_owned(),
            to_nid: "aa".to_owned(),
            parameters,
        },
    )
    .await
    .unwrap();

    let record = state.store.topology().unwrap();
    assert_eq!(record.connection_parameters["aa"]["zz"].success_rate, 0.5);
    assert!(!record.connection_parameters.contains_key("zz"));

    let (event, data) = decode(&subscriber.recv().await.unwrap());
    assert_eq!(event, "nodeConnections");
    // both endpoints see the edge in the symmetric view
    assert_eq!(data["aa"]["zz"]["successRate"], 0.5);
    assert_eq!(data["zz"]["aa"]["successRate"], 0.5);
}

#[tokio::test]
async fn get_simulation_state_reports_uninitialised_on_a_fresh_store() {
    let (_dir, state) = app_state();
    let mut subscriber = state.hub.register();

    dispatch::handle(&state, events::InboundEvent::GetSimulationState)
        .await
        .unwrap();
    let (event, data) = decode(&subscriber.recv().await.unwrap());
    assert_eq!(event, "simulationState");
    assert_eq!(data, "UNINITIALISED");

    dispatch::handle(&state, events::InboundEvent::GetSimulationNodes)
        .await
        .unwrap();
    let (event, data) = decode(&subscriber.recv().await.unwrap());
    assert_eq!(event, "simulationNodes");
    assert_eq!(data, serde_json::json!([]));
}
