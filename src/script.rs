//! Render job scripts for each pipeline stage and write them to disk
//!
//! A job script is the contract with the scheduler and with the tools that read these files
//! afterwards: PBS resource directives first, then the commands in order. Script text is
//! rendered from the templates in `data/templates` and must stay byte-for-byte stable.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::discovery::DiscoveryError;

/// The per-stage rendering contract and the shared stage scripts
pub mod factory;
/// TinyTemplate helpers and the compiled-in templates
pub mod render;
/// Structural preprocessing pipeline
pub mod structural;

/// Owner and group read/write/execute
const SCRIPT_MODE: u32 = 0o770;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render template {name}: {source}")]
    Template {
        name: &'static str,
        #[source]
        source: tinytemplate::error::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Resources requested from the scheduler with the `#PBS -l` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHints {
    pub nodes: u32,
    pub ppn: u32,
    /// Node feature appended to the node spec, e.g. `haswell`
    pub feature: Option<&'static str>,
    pub walltime_hours: u32,
    pub mem_gbs: u32,
}

impl ResourceHints {
    /// One core for four hours with 4 GB, enough for the data-moving stages
    pub const STANDARD: ResourceHints = ResourceHints { nodes: 1, ppn: 1, feature: None, walltime_hours: 4, mem_gbs: 4 };
    /// The PUT job unpacks and uploads the whole session
    pub const PUT: ResourceHints = ResourceHints { mem_gbs: 12, ..ResourceHints::STANDARD };
}

impl fmt::Display for ResourceHints {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "nodes={}:ppn={}", self.nodes, self.ppn)?;
        if let Some(feature) = self.feature {
            write!(f, ":{feature}")?;
        }
        write!(f, ",walltime={}:00:00,mem={}gb", self.walltime_hours, self.mem_gbs)
    }
}

/// A rendered job script and where it goes
#[derive(Debug, Clone)]
pub struct JobScript {
    pub path: PathBuf,
    pub content: String,
    pub resources: ResourceHints,
}

impl JobScript {
    /// Replace any existing file at `path` with this script and make it executable
    ///
    /// The old file is removed first, so a re-render never appends to stale content and always
    /// ends up with the script mode even if the old file had different permissions.
    pub fn write(&self) -> Result<(), RenderError> {
        let io_err = |source| RenderError::Io { path: self.path.clone(), source };

        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(io_err(err)),
            _ => {}
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .mode(SCRIPT_MODE)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(self.content.as_bytes()).map_err(io_err)?;
        // mode() on open is filtered by the umask
        fs::set_permissions(&self.path, fs::Permissions::from_mode(SCRIPT_MODE)).map_err(io_err)?;

        info!("Wrote job script {} ({})", self.path.display(), self.resources);
        Ok(())
    }
}
