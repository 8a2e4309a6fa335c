//! Submit rendered job scripts to the batch scheduler

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Submit job scripts with `qsub`
pub mod qsub;

/// Scheduler-assigned job identifier, opaque to everything but the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        JobId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DependencyMode {
    /// Run only if the prior job succeeded
    AfterOk,
    /// Run once the prior job has terminated, whatever its outcome
    AfterAny,
}

impl fmt::Display for DependencyMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DependencyMode::AfterOk => write!(f, "afterok"),
            DependencyMode::AfterAny => write!(f, "afterany"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub job: JobId,
    pub mode: DependencyMode,
}

impl Dependency {
    pub fn after_ok(job: &JobId) -> Self {
        Dependency { job: job.clone(), mode: DependencyMode::AfterOk }
    }

    pub fn after_any(job: &JobId) -> Self {
        Dependency { job: job.clone(), mode: DependencyMode::AfterAny }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.mode, self.job)
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to run {}: {source}", .program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("submission of {} exited with {status}: {stderr}", .script.display())]
    Rejected { script: PathBuf, status: String, stderr: String },
    #[error("submission of {} returned no job id", .script.display())]
    NoJobId { script: PathBuf },
}

/// Blocking submission of one job script
///
/// Submission is synchronous: when this returns `Ok`, the scheduler has accepted the job and the
/// returned id can be used as a dependency for the next submission.
pub trait SchedulerClient {
    fn submit(&self, script: &Path, dependency: Option<&Dependency>) -> Result<JobId, SchedulerError>;
}
