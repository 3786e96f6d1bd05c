use serde::{Deserialize, Serialize};

/// A uniquely-named unit of user code that nodes can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub name: String,
    pub runtime: Runtime,
    pub code_source: CodeSource,
    /// Source text for [`CodeSource::Raw`], a clone URL (optionally suffixed
    /// `#<branch-or-tag>`) for [`CodeSource::Git`], unused for zip uploads.
    #[serde(default)]
    pub code_data: String,
    pub main_handler: String,
    #[serde(default)]
    pub description: String,
}

/// Language runtimes a node program can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Python3,
    Python2,
    Elixir,
    Scala,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Python3 => "python3",
            Runtime::Python2 => "python2",
            Runtime::Elixir => "elixir",
            Runtime::Scala => "scala",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a program's code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSource {
    Raw,
    Zip,
    Git,
}
