//! Structural validation of topology documents.
//!
//! The validator is a pipeline of pure predicates over the parsed document;
//! it short-circuits on the first failure and reports a stable error code
//! plus machine-readable data, both of which the operator UI consumes
//! directly.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::document::{self, TopologyLanguage};
use crate::expand::NodeGroup;
use crate::node::Node;

const SINGLE_NODES: &str = "single_nodes";
const NODE_GROUPS: &str = "node_groups";

/// Node identifiers: alphanumeric first character, then at least one more
/// character drawn from alphanumerics, `_`, `.` and `-`.
pub const NID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]+$";

fn nid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NID_PATTERN).expect("nid pattern is valid"))
}

/// A topology that passed every structural check. Group expansion may still
/// reject it on semantic grounds (duplicate nids, dangling peers).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTopology {
    pub single_nodes: Vec<Node>,
    pub node_groups: Vec<NodeGroup>,
}

/// Validation failures. The [`std::fmt::Display`] form is the stable error
/// code; [`TopologyError::data`] carries the accompanying payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    #[error("NT_ERROR_PARSING")]
    Parsing(String),
    #[error("NT_ERROR_MAP_TYPE")]
    RootNotMapping,
    #[error("NT_ERROR_BASE_KEYS")]
    UnknownBaseKeys(Vec<String>),
    #[error("NT_ERROR_BASE_VALUE_NOT_LIST_OF_DICTS")]
    BaseValueNotListOfDicts(String),
    #[error("NT_ERROR_NO_NID_SINGLE_NODES")]
    MissingNid(usize),
    #[error("NT_ERROR_NO_PROGRAM_SINGLE_NODES")]
    MissingProgram(usize),
    #[error("NT_ERROR_NID_SINGLE_NODES_NOT_STRING")]
    NidNotString(usize),
    #[error("NT_ERROR_PROGRAM_SINGLE_NODES_NOT_STRING")]
    ProgramNotString(usize),
    #[error("NT_ERROR_CONNECTIONS_SINGLE_NODES_NOT_LIST_OF_STRINGS")]
    ConnectionsNotStringList(usize),
    #[error("NT_ERROR_INVALID_NID")]
    InvalidNid(String),
}

impl TopologyError {
    /// The stable identifier the UI matches on.
    pub fn code(&self) -> String {
        self.to_string()
    }

    /// Machine-readable context for the failure: the parser message, the
    /// offending keys, a 1-based entry index, or the bad nid.
    pub fn data(&self) -> Value {
        match self {
            TopologyError::Parsing(message) => Value::String(message.clone()),
            TopologyError::RootNotMapping => Value::Null,
            TopologyError::UnknownBaseKeys(keys) => {
                Value::Array(keys.iter().cloned().map(Value::String).collect())
            }
            TopologyError::BaseValueNotListOfDicts(key) => Value::String(key.clone()),
            TopologyError::MissingNid(index)
            | TopologyError::MissingProgram(index)
            | TopologyError::NidNotString(index)
            | TopologyError::ProgramNotString(index)
            | TopologyError::ConnectionsNotStringList(index) => Value::from(*index),
            TopologyError::InvalidNid(nid) => Value::String(nid.clone()),
        }
    }
}

/// Validate a raw topology document.
///
/// Checks run in a fixed order and later checks assume the earlier ones
/// held, so the first failure is returned immediately.
pub fn validate(
    language: TopologyLanguage,
    raw: &str,
) -> Result<ValidatedTopology, TopologyError> {
    let value = document::parse(language, raw).map_err(TopologyError::Parsing)?;

    let root = value.as_object().ok_or(TopologyError::RootNotMapping)?;

    let unknown: Vec<String> = root
        .keys()
        .filter(|k| *k != SINGLE_NODES && *k != NODE_GROUPS)
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(TopologyError::UnknownBaseKeys(unknown));
    }

    let single_nodes = entries_of(root, SINGLE_NODES)?;
    let node_groups = entries_of(root, NODE_GROUPS)?;

    check_single_nodes(&single_nodes)?;

    let single_nodes = single_nodes
        .iter()
        .map(|entry| {
            serde_json::from_value::<Node>(Value::Object((*entry).clone()))
                .map_err(|e| TopologyError::Parsing(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let node_groups = node_groups
        .iter()
        .map(|entry| {
            serde_json::from_value::<NodeGroup>(Value::Object((*entry).clone()))
                .map_err(|e| TopologyError::Parsing(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatedTopology {
        single_nodes,
        node_groups,
    })
}

/// Fetch `key` from the root and insist it is a list of mappings. An absent
/// key is an empty list.
fn entries_of<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Vec<&'a Map<String, Value>>, TopologyError> {
    let Some(value) = root.get(key) else {
        return Ok(Vec::new());
    };
    value
        .as_array()
        .and_then(|list| list.iter().map(Value::as_object).collect::<Option<Vec<_>>>())
        .ok_or_else(|| TopologyError::BaseValueNotListOfDicts(key.to_owned()))
}

/// Field-level checks over `single_nodes`, one sweep per error code.
/// Indices in error data are 1-based.
fn check_single_nodes(entries: &[&Map<String, Value>]) -> Result<(), TopologyError> {
    for (i, entry) in entries.iter().enumerate() {
        if !entry.contains_key("nid") {
            return Err(TopologyError::MissingNid(i + 1));
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if !entry.contains_key("program") {
            return Err(TopologyError::MissingProgram(i + 1));
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if !entry["nid"].is_string() {
            return Err(TopologyError::NidNotString(i + 1));
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if !entry["program"].is_string() {
            return Err(TopologyError::ProgramNotString(i + 1));
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if let Some(connections) = entry.get("connections") {
            let all_strings = connections
                .as_array()
                .is_some_and(|list| list.iter().all(Value::is_string));
            if !all_strings {
                return Err(TopologyError::ConnectionsNotStringList(i + 1));
            }
        }
    }
    for entry in entries {
        let nid = entry["nid"].as_str().expect("checked above");
        if !nid_regex().is_match(nid) {
            return Err(TopologyError::InvalidNid(nid.to_owned()));
        }
    }
    Ok(())
}
