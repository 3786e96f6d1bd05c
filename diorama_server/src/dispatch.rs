//! One handler per inbound event.
//!
//! Handlers never propagate errors to the socket: the caller logs failures
//! and the periodic node poll reconciles whatever the operator missed.

use anyhow::{Context as _, Result};

use diorama_deploy::LogStreamTarget;
use diorama_topology::params;

use crate::AppState;
use crate::events::{InboundEvent, outbound};
use crate::topology;

pub async fn handle(state: &AppState, event: InboundEvent) -> Result<()> {
    match event {
        InboundEvent::AddProgram(program) => state.store.upsert_program(&program)?,
        InboundEvent::DeleteProgram(name) => state.store.delete_program(&name)?,
        InboundEvent::ModifyProgram(program) => state.store.update_program(&program)?,
        InboundEvent::GetPrograms => {
            state
                .hub
                .broadcast(outbound::PROGRAMS, &state.store.programs()?);
        }
        InboundEvent::GetRawNetworkTopology => {
            state
                .hub
                .broadcast(outbound::RAW_NETWORK_TOPOLOGY, &state.store.topology()?.raw);
        }
        InboundEvent::GetUnpackedNetworkTopology => {
            state.hub.broadcast(
                outbound::UNPACKED_NETWORK_TOPOLOGY,
                &state.store.topology()?.unpacked,
            );
        }
        InboundEvent::SetCustomConfig(config) => {
            topology::apply_config(&state.store, &state.hub, config)?;
        }
        InboundEvent::GetCustomConfig => {
            state
                .hub
                .broadcast(outbound::CUSTOM_CONFIG, &state.store.custom_config()?);
        }
        InboundEvent::SetUpSimulation => state.simulation.clone().spawn_set_up(),
        InboundEvent::StopAndResetSimulation => {
            let simulation = state.simulation.clone();
            tokio::spawn(async move {
                if let Err(error) = simulation.stop_and_reset().await {
                    tracing::error!("stopAndResetSimulation failed: {error:#}");
                }
            });
        }
        InboundEvent::GetSimulationState => {
            state
                .hub
                .broadcast(outbound::SIMULATION_STATE, &state.simulation.state()?);
        }
        InboundEvent::GetSimulationNodes => {
            state.hub.broadcast(
                outbound::SIMULATION_NODES,
                &state.simulation.simulation_nodes().await?,
            );
        }
        InboundEvent::PerformNodeAction { nid, action } => {
            state.simulation.perform_node_action(&nid, action).await?;
        }
        InboundEvent::StreamNodeLogs(request) => {
            let target = if request.all {
                LogStreamTarget::All
            } else {
                LogStreamTarget::Node {
                    nid: request
                        .nid
                        .context("streamNodeLogs needs either `nid` or `all`")?,
                    since: request.since,
                }
            };
            state.simulation.stream_node_logs(target).await?;
        }
        InboundEvent::ModifyNodeConnections {
            from_nid,
            to_nid,
            parameters,
        } => {
            let mut record = state.store.topology()?;
            params::set_edge_parameters(
                &mut record.connection_parameters,
                &from_nid,
                &to_nid,
                parameters,
            );
            state.store.set_topology(&record)?;
            state.hub.broadcast(
                outbound::NODE_CONNECTIONS,
                &params::parameters_by_node(&record.connection_parameters),
            );
        }
        InboundEvent::GetNodeConnections => {
            state.hub.broadcast(
                outbound::NODE_CONNECTIONS,
                &params::parameters_by_node(&state.store.topology()?.connection_parameters),
            );
        }
    }
    Ok(())
}
