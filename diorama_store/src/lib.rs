//! Persistence for Diorama's operator-facing records.
//!
//! Every record is either a singleton keyed by a compile-time type tag (the
//! [`Record`] trait) or the program list, whose entries are unique on
//! `name`. Each record type owns one JSON document under the store root;
//! writes go through a named temp file and an atomic rename so a crash never
//! leaves a half-written document behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use diorama_topology::{
    ConnectionParametersMap, CustomConfig, Node, Program, RawTopology,
};

/// A singleton record type: the file name is the type tag.
pub trait Record: Serialize + DeserializeOwned {
    const FILE_NAME: &'static str;
}

impl Record for CustomConfig {
    const FILE_NAME: &'static str = "custom_config.json";
}

/// The persisted topology: the operator's raw document plus its unpacked
/// form and the per-edge parameter map, saved together so they can never
/// drift apart across a crash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyRecord {
    pub raw: RawTopology,
    pub unpacked: Vec<Node>,
    pub connection_parameters: ConnectionParametersMap,
}

impl Record for TopologyRecord {
    const FILE_NAME: &'static str = "network_topology.json";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProgramList(Vec<Program>);

impl Record for ProgramList {
    const FILE_NAME: &'static str = "programs.json";
}

const ZIP_FILES_DIR: &str = "program_zip_files";

/// The document store, rooted at the `out/` directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ZIP_FILES_DIR))
            .with_context(|| format!("failed to create store root {}", root.display()))?;
        Ok(Store { root })
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    /// Read a singleton; absent file (or a file from before the record
    /// existed) is `None`.
    pub fn get_singleton<R: Record>(&self) -> Result<Option<R>> {
        let path = self.path_of(R::FILE_NAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let record = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to decode {}", path.display()))?;
        Ok(Some(record))
    }

    /// Upsert a singleton, atomically.
    pub fn put_singleton<R: Record>(&self, record: &R) -> Result<()> {
        let path = self.path_of(R::FILE_NAME);
        let json = serde_json::to_vec_pretty(record)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(())
    }

    /// Delete a singleton's document. Absence is not an error.
    pub fn remove_singleton<R: Record>(&self) -> Result<()> {
        let path = self.path_of(R::FILE_NAME);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    /// The operator config, lazily initialised to defaults on first read.
    pub fn custom_config(&self) -> Result<CustomConfig> {
        if let Some(config) = self.get_singleton::<CustomConfig>()? {
            return Ok(config);
        }
        let config = CustomConfig::default();
        self.put_singleton(&config)?;
        Ok(config)
    }

    pub fn set_custom_config(&self, config: &CustomConfig) -> Result<()> {
        self.put_singleton(config)
    }

    /// The persisted topology record, defaulting to the empty topology.
    pub fn topology(&self) -> Result<TopologyRecord> {
        Ok(self.get_singleton::<TopologyRecord>()?.unwrap_or_default())
    }

    pub fn set_topology(&self, record: &TopologyRecord) -> Result<()> {
        self.put_singleton(record)
    }

    pub fn programs(&self) -> Result<Vec<Program>> {
        Ok(self.get_singleton::<ProgramList>()?.unwrap_or_default().0)
    }

    /// Insert or replace the program with the same name.
    pub fn upsert_program(&self, program: &Program) -> Result<()> {
        let mut list = self.get_singleton::<ProgramList>()?.unwrap_or_default();
        match list.0.iter_mut().find(|p| p.name == program.name) {
            Some(existing) => *existing = program.clone(),
            None => list.0.push(program.clone()),
        }
        self.put_singleton(&list)
    }

    /// Replace an existing program; unknown names are ignored.
    pub fn update_program(&self, program: &Program) -> Result<()> {
        let mut list = self.get_singleton::<ProgramList>()?.unwrap_or_default();
        if let Some(existing) = list.0.iter_mut().find(|p| p.name == program.name) {
            *existing = program.clone();
            self.put_singleton(&list)?;
        }
        Ok(())
    }

    pub fn delete_program(&self, name: &str) -> Result<()> {
        let mut list = self.get_singleton::<ProgramList>()?.unwrap_or_default();
        list.0.retain(|p| p.name != name);
        self.put_singleton(&list)
    }

    /// Persist an uploaded program archive under
    /// `program_zip_files/<name>.zip`.
    pub fn write_program_zip(&self, program_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.program_zip_path(program_name);
        let mut tmp = tempfile::NamedTempFile::new_in(self.root.join(ZIP_FILES_DIR))?;
        tmp.write_all(bytes)?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(path)
    }

    pub fn program_zip_path(&self, program_name: &str) -> PathBuf {
        self.root
            .join(ZIP_FILES_DIR)
            .join(format!("{program_name}.zip"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
