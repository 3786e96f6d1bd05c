//! Topology and config writes shared by the HTTP and WebSocket handlers.

use anyhow::Result;

use diorama_store::Store;
use diorama_topology::{
    CustomConfig, Node, RawTopology, TopologyError, TopologyLanguage, params,
    set_self_connections, unpack, validate,
};

use crate::events::outbound;
use crate::hub::Hub;

/// Validate, expand and persist a topology document.
///
/// The outer `Result` is infrastructure failure; the inner one is the
/// validation verdict the caller reports to the UI. On success the raw
/// document, the unpacked node list and the reconciled connection-parameter
/// map are saved together.
pub fn save_topology(
    store: &Store,
    language: TopologyLanguage,
    raw: &str,
) -> Result<Result<Vec<Node>, TopologyError>> {
    let config = store.custom_config()?;

    let validated = match validate(language, raw) {
        Ok(validated) => validated,
        Err(error) => return Ok(Err(error)),
    };
    let unpacked = match unpack(&validated, config.self_connected_nodes) {
        Ok(unpacked) => unpacked,
        Err(error) => return Ok(Err(error)),
    };

    let mut record = store.topology()?;
    record.raw = RawTopology {
        language,
        raw_network_topology: raw.to_owned(),
    };
    record.unpacked = unpacked.clone();
    params::reconcile(&mut record.connection_parameters, &unpacked);
    store.set_topology(&record)?;

    Ok(Ok(unpacked))
}

/// Persist a new config. Flipping `selfConnectedNodes` rewrites the stored
/// unpacked topology (adding or stripping self-edges), reconciles the
/// parameter store, and pushes the updated topology to subscribers.
pub fn apply_config(store: &Store, hub: &Hub, config: CustomConfig) -> Result<()> {
    let previous = store.custom_config()?;
    store.set_custom_config(&config)?;

    if previous.self_connected_nodes != config.self_connected_nodes {
        let mut record = store.topology()?;
        set_self_connections(&mut record.unpacked, config.self_connected_nodes);
        params::reconcile(&mut record.connection_parameters, &record.unpacked);
        store.set_topology(&record)?;
        hub.broadcast(outbound::UNPACKED_NETWORK_TOPOLOGY, &record.unpacked);
    }
    Ok(())
}
