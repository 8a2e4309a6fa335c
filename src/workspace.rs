//! Working directories for one submission attempt
//!
//! The directory names embed the epoch second at which they were first derived, and the rendered
//! job scripts embed those names. The allocator therefore derives them once and afterwards only
//! hands out the stored value.

use std::cell::OnceCell;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use thiserror::Error;

use crate::unit::WorkUnitIdentity;

const PROCESS_DATA_SUFFIX: &str = ".XNAT_PROCESS_DATA";
const CHECK_DATA_SUFFIX: &str = ".XNAT_CHECK_DATA";
const MARK_COMPLETE_SUFFIX: &str = ".XNAT_MARK_COMPLETE_RUNNING_STATUS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Main working directory, the data is fetched and processed here
    pub working_dir: PathBuf,
    /// Holds the check data job script
    pub check_data_dir: PathBuf,
    /// Holds the mark complete job script, removed by that job when it finishes
    pub mark_completion_dir: PathBuf,
}

#[derive(Debug, Error)]
#[error("cannot create workspace directory {}: {source}", .path.display())]
pub struct WorkspaceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl Workspace {
    /// `<build>/<project>/<pipeline>.<subject>_<classifier>[_<scan>].<epoch>` plus fixed suffixes
    pub fn derive(build_home: &Path, pipeline: &str, unit: &WorkUnitIdentity, epoch_seconds: i64) -> Workspace {
        let prefix = build_home
            .join(&unit.project)
            .join(format!("{}.{}.{}", pipeline, unit.stem(), epoch_seconds));

        Workspace {
            working_dir: with_suffix(&prefix, PROCESS_DATA_SUFFIX),
            check_data_dir: with_suffix(&prefix, CHECK_DATA_SUFFIX),
            mark_completion_dir: with_suffix(&prefix, MARK_COMPLETE_SUFFIX),
        }
    }

    /// Create all three directories
    ///
    /// Parents are created as needed but each leaf must not exist yet: an existing leaf means
    /// another run derived the same name in the same second, and sharing it would mix two runs.
    pub fn create(&self) -> Result<(), WorkspaceError> {
        for dir in [&self.working_dir, &self.check_data_dir, &self.mark_completion_dir] {
            create_exclusive(dir).map_err(|source| WorkspaceError { path: dir.clone(), source })?;
            info!("Created directory {}", dir.display());
        }
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn create_exclusive(dir: &Path) -> io::Result<()> {
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir(dir)
}

/// Source of epoch seconds, swapped out in tests
pub type Clock = Box<dyn Fn() -> i64>;

pub fn system_clock() -> Clock {
    Box::new(|| Utc::now().timestamp())
}

/// Memoizing workspace allocator bound to one unit and pipeline
pub struct WorkspaceAllocator {
    build_home: PathBuf,
    pipeline: String,
    unit: WorkUnitIdentity,
    clock: Clock,
    workspace: OnceCell<Workspace>,
}

impl WorkspaceAllocator {
    pub fn new(build_home: &Path, pipeline: &str, unit: &WorkUnitIdentity, clock: Clock) -> Self {
        WorkspaceAllocator {
            build_home: build_home.to_path_buf(),
            pipeline: pipeline.to_string(),
            unit: unit.clone(),
            clock,
            workspace: OnceCell::new(),
        }
    }

    /// Derive the workspace on first call, return the stored one afterwards
    pub fn allocate(&self) -> &Workspace {
        self.workspace.get_or_init(|| {
            let epoch = (self.clock)();
            Workspace::derive(&self.build_home, &self.pipeline, &self.unit, epoch)
        })
    }
}
