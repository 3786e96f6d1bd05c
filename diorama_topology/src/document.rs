use serde::{Deserialize, Serialize};

/// Languages a topology document can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyLanguage {
    #[serde(rename = "YAML")]
    Yaml,
    #[serde(rename = "JSON")]
    Json,
}

/// The operator-authored topology text, persisted verbatim alongside its
/// unpacked form so the editor can round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTopology {
    pub language: TopologyLanguage,
    pub raw_network_topology: String,
}

impl Default for RawTopology {
    fn default() -> Self {
        RawTopology {
            language: TopologyLanguage::Yaml,
            raw_network_topology: String::new(),
        }
    }
}

/// Parse the raw text into a language-neutral JSON value.
///
/// YAML documents are deserialised through serde straight into
/// [`serde_json::Value`], so downstream checks only ever deal with one
/// value model.
pub fn parse(
    language: TopologyLanguage,
    raw: &str,
) -> Result<serde_json::Value, String> {
    match language {
        TopologyLanguage::Yaml => {
            serde_yaml::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string())
        }
        TopologyLanguage::Json => {
            serde_json::from_str::<serde_json::Value>(raw).map_err(|e| e.to_string())
        }
    }
}
