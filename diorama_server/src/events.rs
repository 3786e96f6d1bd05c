//! The WebSocket wire protocol.
//!
//! Frames are `{"event": <name>, "data": <json-encoded string>}` in both
//! directions; `data` is itself a JSON document serialised to a string.
//! Inbound frames decode into the [`InboundEvent`] sum type, with the
//! on-wire event name as the discriminator.

use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};

use diorama_deploy::NodeAction;
use diorama_topology::{ConnectionParameters, CustomConfig, Program};

/// Outbound event names.
pub mod outbound {
    pub const PROGRAMS: &str = "programs";
    pub const RAW_NETWORK_TOPOLOGY: &str = "rawNetworkTopology";
    pub const UNPACKED_NETWORK_TOPOLOGY: &str = "unpackedNetworkTopology";
    pub const CUSTOM_CONFIG: &str = "customConfig";
    pub const SIMULATION_STATE: &str = "simulationState";
    pub const SIMULATION_NODES: &str = "simulationNodes";
    pub const SIMULATION_LOGS: &str = "simulationLogs";
    pub const NODE_CONNECTIONS: &str = "nodeConnections";
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    data: String,
}

/// Everything a subscriber can ask the backend to do.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AddProgram(Program),
    DeleteProgram(String),
    ModifyProgram(Program),
    GetPrograms,
    GetRawNetworkTopology,
    GetUnpackedNetworkTopology,
    SetCustomConfig(CustomConfig),
    GetCustomConfig,
    SetUpSimulation,
    StopAndResetSimulation,
    GetSimulationState,
    GetSimulationNodes,
    PerformNodeAction {
        nid: String,
        action: NodeAction,
    },
    StreamNodeLogs(LogStreamRequest),
    ModifyNodeConnections {
        from_nid: String,
        to_nid: String,
        parameters: ConnectionParameters,
    },
    GetNodeConnections,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStreamRequest {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub nid: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeActionRequest {
    nid: String,
    action: NodeAction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModifyNodeConnectionsRequest {
    from_nid: String,
    to_nid: String,
    parameters: ConnectionParameters,
}

fn payload<'a, T: Deserialize<'a>>(data: &'a Option<String>, event: &str) -> Result<T> {
    let data = data
        .as_deref()
        .with_context(|| format!("`{event}` requires a data payload"))?;
    serde_json::from_str(data).with_context(|| format!("bad payload for `{event}`"))
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent> {
    let frame: InboundFrame = serde_json::from_str(text).context("unparseable frame")?;
    let event = match frame.event.as_str() {
        "addProgram" => InboundEvent::AddProgram(payload(&frame.data, &frame.event)?),
        "deleteProgram" => InboundEvent::DeleteProgram(payload(&frame.data, &frame.event)?),
        "modifyProgram" => InboundEvent::ModifyProgram(payload(&frame.data, &frame.event)?),
        "getPrograms" => InboundEvent::GetPrograms,
        "getRawNetworkTopology" => InboundEvent::GetRawNetworkTopology,
        "getUnpackedNetworkTopology" => InboundEvent::GetUnpackedNetworkTopology,
        "setCustomConfig" => InboundEvent::SetCustomConfig(payload(&frame.data, &frame.event)?),
        "getCustomConfig" => InboundEvent::GetCustomConfig,
        "setUpSimulation" => InboundEvent::SetUpSimulation,
        "stopAndResetSimulation" => InboundEvent::StopAndResetSimulation,
        "getSimulationState" => InboundEvent::GetSimulationState,
        "getSimulationNodes" => InboundEvent::GetSimulationNodes,
        "performNodeAction" => {
            let request: NodeActionRequest = payload(&frame.data, &frame.event)?;
            InboundEvent::PerformNodeAction {
                nid: request.nid,
                action: request.action,
            }
        }
        "streamNodeLogs" => InboundEvent::StreamNodeLogs(payload(&frame.data, &frame.event)?),
        "modifyNodeConnections" => {
            let request: ModifyNodeConnectionsRequest = payload(&frame.data, &frame.event)?;
            InboundEvent::ModifyNodeConnections {
                from_nid: request.from_nid,
                to_nid: request.to_nid,
                parameters: request.parameters,
            }
        }
        "getNodeConnections" => InboundEvent::GetNodeConnections,
        other => bail!("unrecognised event `{other}`"),
    };
    Ok(event)
}

/// Encode an outbound frame; `data` is serialised to a string first, per the
/// protocol.
pub fn encode_frame<T: Serialize>(event: &str, data: &T) -> Result<String> {
    let data = serde_json::to_string(data)?;
    Ok(serde_json::to_string(&OutboundFrame { event, data })?)
}

#[cfg(test)]
mod tests {
    use diorama_topology::{CodeSource, Runtime};

    use super::*;

    #[test]
    fn decodes_events_without_payload() {
        assert_eq!(
            decode_frame(r#"{"event": "getPrograms"}"#).unwrap(),
            InboundEvent::GetPrograms
        );
        assert_eq!(
            decode_frame(r#"{"event": "setUpSimulation"}"#).unwrap(),
            InboundEvent::SetUpSimulation
        );
    }

    #[test]
    fn decodes_a_program_payload() {
        let frame = r#"{"event": "addProgram", "data": "{\"name\": \"p\", \"runtime\": \"python3\", \"codeSource\": \"raw\", \"codeData\": \"x = 1\", \"mainHandler\": \"handle\", \"description\": \"\"}"}"#;
        let InboundEvent::AddProgram(program) = decode_frame(frame).unwrap() else {
            panic!("wrong event");
        };
        assert_eq!(program.name, "p");
        assert_eq!(program.runtime, Runtime::Python3);
        assert_eq!(program.code_source, CodeSource::Raw);
    }

    #[test]
    fn decodes_node_action_requests() {
        let frame =
            r#"{"event": "performNodeAction", "data": "{\"nid\": \"n0\", \"action\": \"start\"}"}"#;
        assert_eq!(
            decode_frame(frame).unwrap(),
            InboundEvent::PerformNodeAction {
                nid: "n0".to_owned(),
                action: NodeAction::Start,
            }
        );
    }

    #[test]
    fn decodes_log_stream_requests() {
        let frame = r#"{"event": "streamNodeLogs", "data": "{\"all\": true}"}"#;
        let InboundEvent::StreamNodeLogs(request) = decode_frame(frame).unwrap() else {
            panic!("wrong event");
        };
        assert!(request.all);
        assert_eq!(request.nid, None);

        let frame = r#"{"event": "streamNodeLogs", "data": "{\"nid\": \"n0\", \"since\": 17}"}"#;
        let InboundEvent::StreamNodeLogs(request) = decode_frame(frame).unwrap() else {
            panic!("wrong event");
        };
        assert_eq!(request.nid.as_deref(), Some("n0"));
        assert_eq!(request.since, Some(17));
    }

    #[test]
    fn rejects_unknown_events_and_missing_payloads() {
        assert!(decode_frame(r#"{"event": "explode"}"#).is_err());
        assert!(decode_frame(r#"{"event": "addProgram"}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn outbound_data_is_a_json_encoded_string() {
        let frame = encode_frame("simulationState", &"UNINITIALISED").unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "simulationState");
        assert_eq!(value["data"], "\"UNINITIALISED\"");
    }
}
