use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;

use crate::scheduler::{Dependency, JobId, SchedulerClient, SchedulerError};

/// PBS/Torque submission through the `qsub` command
///
/// A dependency is passed as `-W depend=<mode>:<job id>`. The job id is qsub's stdout with
/// trailing newlines removed.
pub struct Qsub {
    program: PathBuf,
}

impl Qsub {
    pub fn new(program: &Path) -> Self {
        Qsub { program: program.to_path_buf() }
    }

    fn arguments(script: &Path, dependency: Option<&Dependency>) -> Vec<String> {
        let mut arguments = Vec::new();
        if let Some(dependency) = dependency {
            arguments.push("-W".to_string());
            arguments.push(format!("depend={dependency}"));
        }
        arguments.push(script.to_string_lossy().into_owned());
        arguments
    }
}

impl SchedulerClient for Qsub {
    fn submit(&self, script: &Path, dependency: Option<&Dependency>) -> Result<JobId, SchedulerError> {
        let arguments = Qsub::arguments(script, dependency);
        let mut qsub = Command::new(&self.program);
        let cmd = qsub.args(&arguments);
        info!("Running qsub process");
        info!("{:?}", &cmd);

        let output = cmd.output().map_err(|source| SchedulerError::Launch {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(SchedulerError::Rejected {
                script: script.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = stdout.trim_end_matches(['\r', '\n']).trim();
        if job_id.is_empty() {
            return Err(SchedulerError::NoJobId { script: script.to_path_buf() });
        }
        Ok(JobId::new(job_id))
    }
}
