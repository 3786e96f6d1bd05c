//! Per-program image build contexts.
//!
//! The layout is what the runtime Dockerfiles reference, so it is exact:
//!
//! ```text
//! <ctx>/
//!   <base files for the runtime>      copied verbatim
//!   node_addresses.yml
//!   connection_parameters.yml
//!   user_node_files/
//!     node.<ext>                      raw code source only
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use tempfile::TempDir;

use diorama_store::Store;
use diorama_topology::{CodeSource, ConnectionParameters, NodeAddress, Program};

use crate::catalog;

pub const NODE_ADDRESSES_FILE_NAME: &str = "node_addresses.yml";
pub const CONNECTION_PARAMETERS_FILE_NAME: &str = "connection_parameters.yml";
pub const USER_NODE_FILES_DIRECTORY_NAME: &str = "user_node_files";
pub const NODE_MAIN_FILE_NAME_FOR_RAW: &str = "node";

/// Assemble a fresh build context for `program`.
///
/// `base_files_dir` is the repository-provided `base_node_files/` root; the
/// subdirectory named after the runtime supplies the Dockerfile and glue.
pub fn materialize_build_context(
    program: &Program,
    node_addresses: &[NodeAddress],
    parameters_by_node: &BTreeMap<String, BTreeMap<String, ConnectionParameters>>,
    base_files_dir: &Path,
    store: &Store,
) -> Result<TempDir> {
    let context = TempDir::new()?;

    let base = base_files_dir.join(program.runtime.as_str());
    copy_dir_contents(&base, context.path()).with_context(|| {
        format!(
            "failed to copy base files for runtime `{}` from {}",
            program.runtime,
            base.display()
        )
    })?;

    fs::write(
        context.path().join(NODE_ADDRESSES_FILE_NAME),
        serde_yaml::to_string(node_addresses)?,
    )?;
    fs::write(
        context.path().join(CONNECTION_PARAMETERS_FILE_NAME),
        serde_yaml::to_string(parameters_by_node)?,
    )?;

    let user_dir = context.path().join(USER_NODE_FILES_DIRECTORY_NAME);
    fs::create_dir(&user_dir)?;
    write_user_code(program, &user_dir, store)?;

    Ok(context)
}

fn write_user_code(program: &Program, user_dir: &Path, store: &Store) -> Result<()> {
    match program.code_source {
        CodeSource::Raw => {
            let file_name = format!(
                "{NODE_MAIN_FILE_NAME_FOR_RAW}{}",
                catalog::file_extension(program.runtime)
            );
            fs::write(user_dir.join(file_name), &program.code_data)?;
        }
        CodeSource::Zip => {
            let zip_path = store.program_zip_path(&program.name);
            let file = fs::File::open(&zip_path).with_context(|| {
                format!(
                    "no uploaded archive for program `{}` at {}",
                    program.name,
                    zip_path.display()
                )
            })?;
            let mut archive = zip::ZipArchive::new(file)?;
            archive
                .extract(user_dir)
                .with_context(|| format!("failed to extract archive for `{}`", program.name))?;
        }
        CodeSource::Git => {
            let (url, reference) = match program.code_data.split_once('#') {
                Some((url, reference)) => (url, Some(reference)),
                None => (program.code_data.as_str(), None),
            };
            if url.is_empty() {
                bail!("program `{}` has a git code source but no URL", program.name);
            }
            let repository = git2::Repository::clone(url, user_dir)
                .with_context(|| format!("failed to clone `{url}`"))?;
            if let Some(reference) = reference {
                let (object, resolved) = repository
                    .revparse_ext(reference)
                    .with_context(|| format!("unknown ref `{reference}` in `{url}`"))?;
                repository.checkout_tree(&object, None)?;
                match resolved.and_then(|r| r.name().map(str::to_owned)) {
                    Some(name) => repository.set_head(&name)?,
                    None => repository.set_head_detached(object.id())?,
                }
            }
        }
    }
    Ok(())
}

fn copy_dir_contents(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            copy_dir_contents(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use diorama_topology::Runtime;

    use super::*;

    fn raw_program() -> Program {
        Program {
            name: "prog".to_owned(),
            runtime: Runtime::Python3,
            code_source: CodeSource::Raw,
            code_data: "def handle(msg):\n    pass\n".to_owned(),
            main_handler: "handle".to_owned(),
            description: String::new(),
        }
    }

    fn addresses() -> Vec<NodeAddress> {
        vec![NodeAddress {
            nid: "n0".to_owned(),
            ip_address: Ipv4Addr::new(172, 190, 0, 4),
            port: 2000,
        }]
    }

    #[test]
    fn raw_context_has_the_exact_layout() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("python3/glue")).unwrap();
        fs::write(base.path().join("python3/Dockerfile"), "FROM python:3\n").unwrap();
        fs::write(base.path().join("python3/glue/main.py"), "# glue\n").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "n0".to_owned(),
            BTreeMap::from([("n0".to_owned(), ConnectionParameters::default())]),
        );

        let context = materialize_build_context(
            &raw_program(),
            &addresses(),
            &parameters,
            base.path(),
            &store,
        )
        .unwrap();

        let ctx = context.path();
        assert!(ctx.join("Dockerfile").exists());
        assert!(ctx.join("glue/main.py").exists());
        assert!(ctx.join("node_addresses.yml").exists());
        assert!(ctx.join("connection_parameters.yml").exists());
        assert_eq!(
            fs::read_to_string(ctx.join("user_node_files/node.py")).unwrap(),
            "def handle(msg):\n    pass\n"
        );

        let addresses_yaml = fs::read_to_string(ctx.join(NODE_ADDRESSES_FILE_NAME)).unwrap();
        assert!(addresses_yaml.contains("nid: n0"));
        assert!(addresses_yaml.contains("ip_address: 172.190.0.4"));
        assert!(addresses_yaml.contains("port: 2000"));

        let parameters_yaml =
            fs::read_to_string(ctx.join(CONNECTION_PARAMETERS_FILE_NAME)).unwrap();
        assert!(parameters_yaml.contains("successRate: 1.0"));
    }

    #[test]
    fn missing_zip_archive_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("python3")).unwrap();
        fs::write(base.path().join("python3/Dockerfile"), "FROM python:3\n").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();

        let mut program = raw_program();
        program.code_source = CodeSource::Zip;

        let result =
            materialize_build_context(&program, &addresses(), &BTreeMap::new(), base.path(), &store);
        assert!(result.is_err());
    }
}
