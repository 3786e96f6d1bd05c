//! Static runtime catalog.
//!
//! File extensions are known for every declared runtime, but only runtimes
//! with a launch spec here can actually be materialised; the others are
//! extension points.

use diorama_topology::Runtime;

/// How a runtime's containers are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSpec {
    pub working_dir: &'static str,
    pub run_command: &'static [&'static str],
}

static PYTHON3: LaunchSpec = LaunchSpec {
    working_dir: "/usr/src/app",
    run_command: &["python", "-u", "main.py"],
};

/// Source-file extension for user code written in `runtime`.
pub fn file_extension(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Python3 | Runtime::Python2 => ".py",
        Runtime::Elixir => ".ex",
        Runtime::Scala => ".scala",
    }
}

/// Launch details, for the runtimes that are actually usable.
pub fn launch_spec(runtime: Runtime) -> Option<&'static LaunchSpec> {
    match runtime {
        Runtime::Python3 => Some(&PYTHON3),
        _ => None,
    }
}
