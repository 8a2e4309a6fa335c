use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Ordered pipeline milestones
///
/// Declaration order is the processing order, and every submission decision is a threshold check
/// against the requested stage: a job runs only if `requested >= job stage`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessingStage {
    PrepareScripts,
    GetData,
    ProcessData,
    CleanData,
    PutData,
    CheckData,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid processing stage '{0}', expected one of PREPARE_SCRIPTS, GET_DATA, PROCESS_DATA, CLEAN_DATA, PUT_DATA, CHECK_DATA")]
pub struct InvalidStageError(pub String);

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 6] = [
        ProcessingStage::PrepareScripts,
        ProcessingStage::GetData,
        ProcessingStage::ProcessData,
        ProcessingStage::CleanData,
        ProcessingStage::PutData,
        ProcessingStage::CheckData,
    ];

    /// Name used in configuration files and in the submission manifest
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::PrepareScripts => "PREPARE_SCRIPTS",
            ProcessingStage::GetData => "GET_DATA",
            ProcessingStage::ProcessData => "PROCESS_DATA",
            ProcessingStage::CleanData => "CLEAN_DATA",
            ProcessingStage::PutData => "PUT_DATA",
            ProcessingStage::CheckData => "CHECK_DATA",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ProcessingStage {
    type Err = InvalidStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessingStage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| InvalidStageError(s.to_string()))
    }
}
