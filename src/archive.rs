//! Calls into the archive: deleting stale output and tracking running status
//!
//! Both are done by running external programs; this crate only decides when to call them.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::info;
use thiserror::Error;

/// Delete a session resource before new output is written
pub mod delete;
/// Advisory queued/running marker for a work unit
pub mod status;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to run {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} exited with {status}: {stderr}", .program.display())]
    Failed { program: PathBuf, status: String, stderr: String },
    #[error("no delete resource program configured, cannot clean output resource {resource}")]
    NoDeleteProgram { resource: String },
}

/// Host name of a server URL: scheme and any path removed
pub fn server_name(server: &str) -> &str {
    let without_scheme = server.split_once("://").map_or(server, |(_, rest)| rest);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// Run a program to completion, logging the command line without its password argument
fn run(program: &Path, arguments: &[String]) -> Result<Output, ArchiveError> {
    let shown: Vec<&str> = arguments
        .iter()
        .map(|a| if a.starts_with("--password=") { "--password=***" } else { a.as_str() })
        .collect();
    info!("Running {} {}", program.display(), shown.join(" "));

    Command::new(program)
        .args(arguments)
        .output()
        .map_err(|source| ArchiveError::Launch { program: program.to_path_buf(), source })
}

fn failed(program: &Path, output: &Output) -> ArchiveError {
    ArchiveError::Failed {
        program: program.to_path_buf(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}
