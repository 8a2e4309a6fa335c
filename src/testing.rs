//! Fixtures and in-memory fakes for unit tests

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use crate::archive::delete::ResourceDeleter;
use crate::archive::status::RunStatusGate;
use crate::archive::ArchiveError;
use crate::environment::Environment;
use crate::scheduler::{Dependency, JobId, SchedulerClient, SchedulerError};
use crate::settings::SubmissionConfig;
use crate::stage::ProcessingStage;
use crate::unit::WorkUnitIdentity;

/// Site layout rooted at `root`
pub fn environment(root: &Path) -> Environment {
    Environment {
        jobs_home: root.join("jobs"),
        log_dir: root.join("logs"),
        build_home: root.join("build"),
        control_dir: root.join("control"),
        archive_root: root.join("archive"),
        db_name: "intradb".to_string(),
        singularity_version: "singularity/3.8".to_string(),
        container_path: root.join("qunex.sif"),
        xnat_container_path: root.join("xnat.sif"),
        bind_path: format!("{}/bind", root.display()),
        qunex_run_path: root.join("qunex_run"),
        qunex_parameter_path: root.join("qunex_parameters"),
        gradient_coefficient_path: root.join("gradients"),
        scratch_dir: root.join("scratch"),
    }
}

pub fn config(stage: ProcessingStage) -> SubmissionConfig {
    SubmissionConfig {
        username: "tester".to_string(),
        password: "secret".to_string(),
        server: "https://db.example.org".to_string(),
        put_server: "https://put1.example.org".to_string(),
        clean_output_first: false,
        walltime_hours: 36,
        mem_gbs: 16,
        output_resource_suffix: "Structural_preproc".to_string(),
        processing_stage: stage,
    }
}

/// One accepted submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub script: PathBuf,
    pub dependency: Option<Dependency>,
    pub job: JobId,
}

/// Accepts every script, handing out ids `1.pbs`, `2.pbs`, ...
///
/// Scripts whose file name ends with `reject_suffix` are refused.
#[derive(Default)]
pub struct RecordingScheduler {
    pub reject_suffix: Option<String>,
    pub submitted: RefCell<Vec<Submitted>>,
    next: Cell<u32>,
}

impl RecordingScheduler {
    pub fn rejecting(suffix: &str) -> Self {
        RecordingScheduler { reject_suffix: Some(suffix.to_string()), ..Default::default() }
    }

    /// File names of the accepted scripts in submission order
    pub fn script_names(&self) -> Vec<String> {
        self.submitted
            .borrow()
            .iter()
            .map(|s| s.script.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

impl SchedulerClient for RecordingScheduler {
    fn submit(&self, script: &Path, dependency: Option<&Dependency>) -> Result<JobId, SchedulerError> {
        if let Some(suffix) = &self.reject_suffix {
            if script.to_string_lossy().ends_with(suffix.as_str()) {
                return Err(SchedulerError::Rejected {
                    script: script.to_path_buf(),
                    status: "exit status: 1".to_string(),
                    stderr: "qsub: job rejected".to_string(),
                });
            }
        }
        self.next.set(self.next.get() + 1);
        let job = JobId::new(format!("{}.pbs", self.next.get()));
        self.submitted.borrow_mut().push(Submitted {
            script: script.to_path_buf(),
            dependency: dependency.cloned(),
            job: job.clone(),
        });
        Ok(job)
    }
}

/// Run status gate answering from a fixed list of busy subjects
#[derive(Default)]
pub struct RecordingGate {
    pub busy_subjects: Vec<String>,
    pub fail_check: bool,
    pub fail_mark: bool,
    pub checked: RefCell<Vec<WorkUnitIdentity>>,
    pub marked: RefCell<Vec<WorkUnitIdentity>>,
}

impl RunStatusGate for RecordingGate {
    fn is_queued_or_running(&self, unit: &WorkUnitIdentity) -> Result<bool, ArchiveError> {
        self.checked.borrow_mut().push(unit.clone());
        if self.fail_check {
            return Err(ArchiveError::Launch {
                program: PathBuf::from("check"),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(self.busy_subjects.contains(&unit.subject))
    }

    fn mark_queued(&self, unit: &WorkUnitIdentity, _config: &SubmissionConfig) -> Result<(), ArchiveError> {
        if self.fail_mark {
            return Err(ArchiveError::Failed {
                program: PathBuf::from("mark"),
                status: "exit status: 2".to_string(),
                stderr: "archive unavailable".to_string(),
            });
        }
        self.marked.borrow_mut().push(unit.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDeleter {
    pub fail: bool,
    pub deleted: RefCell<Vec<String>>,
}

impl ResourceDeleter for RecordingDeleter {
    fn delete_resource(&self, _config: &SubmissionConfig, _unit: &WorkUnitIdentity, resource: &str) -> Result<(), ArchiveError> {
        if self.fail {
            return Err(ArchiveError::NoDeleteProgram { resource: resource.to_string() });
        }
        self.deleted.borrow_mut().push(resource.to_string());
        Ok(())
    }
}
