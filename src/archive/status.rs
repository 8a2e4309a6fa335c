use std::path::PathBuf;

use log::info;

use crate::archive::{failed, run, server_name, ArchiveError};
use crate::environment::Environment;
use crate::settings::SubmissionConfig;
use crate::unit::WorkUnitIdentity;

/// Name of the archive resource holding the running-status marker
pub const RUNNING_STATUS_RESOURCE: &str = "RunningStatus";

/// Queued/running marker for a work unit
///
/// This is advisory only. Checking and marking are separate calls, so two submissions racing for
/// the same unit can both see "not running". Clearing the marker is not a call here: it is the
/// mark complete job the orchestrator submits at the end of every pipeline.
pub trait RunStatusGate {
    fn is_queued_or_running(&self, unit: &WorkUnitIdentity) -> Result<bool, ArchiveError>;
    fn mark_queued(&self, unit: &WorkUnitIdentity, config: &SubmissionConfig) -> Result<(), ArchiveError>;
}

/// Gate backed by the pipeline's status programs
///
/// `<P>.XNAT_MARK_RUNNING_STATUS --queued` sets the marker. `<P>.XNAT_CHECK_RUNNING_STATUS` tests
/// it, exiting 0 when the unit is queued or running and 1 when it is not.
pub struct ProgramRunStatusGate {
    mark_program: PathBuf,
    check_program: PathBuf,
}

impl ProgramRunStatusGate {
    pub fn new(env: &Environment, pipeline: &str) -> Self {
        ProgramRunStatusGate {
            mark_program: env.pipeline_program(pipeline, ".XNAT_MARK_RUNNING_STATUS"),
            check_program: env.pipeline_program(pipeline, ".XNAT_CHECK_RUNNING_STATUS"),
        }
    }

    fn unit_arguments(unit: &WorkUnitIdentity) -> Vec<String> {
        let mut arguments = vec![
            format!("--project={}", unit.project),
            format!("--subject={}", unit.subject),
            format!("--classifier={}", unit.classifier),
        ];
        if let Some(scan) = &unit.scan {
            arguments.push(format!("--scan={scan}"));
        }
        arguments.push(format!("--resource={RUNNING_STATUS_RESOURCE}"));
        arguments
    }
}

impl RunStatusGate for ProgramRunStatusGate {
    fn is_queued_or_running(&self, unit: &WorkUnitIdentity) -> Result<bool, ArchiveError> {
        let output = run(&self.check_program, &Self::unit_arguments(unit))?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failed(&self.check_program, &output)),
        }
    }

    fn mark_queued(&self, unit: &WorkUnitIdentity, config: &SubmissionConfig) -> Result<(), ArchiveError> {
        let mut arguments = vec![
            format!("--user={}", config.username),
            format!("--password={}", config.password),
            format!("--server={}", server_name(&config.put_server)),
        ];
        arguments.extend(Self::unit_arguments(unit));
        arguments.push("--queued".to_string());

        let output = run(&self.mark_program, &arguments)?;
        if !output.status.success() {
            return Err(failed(&self.mark_program, &output));
        }
        info!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::stage::ProcessingStage;
    use crate::testing;

    fn install(env: &Environment, suffix: &str, body: &str) {
        let path = env.pipeline_program("Pipe", suffix);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn check_program_exit_code_decides() {
        let root = TempDir::new().expect("temp dir");
        let env = testing::environment(root.path());
        let unit = WorkUnitIdentity::new("P", "S", "C");
        let gate = ProgramRunStatusGate::new(&env, "Pipe");

        install(&env, ".XNAT_CHECK_RUNNING_STATUS", "#!/bin/sh\nexit 0\n");
        assert!(gate.is_queued_or_running(&unit).unwrap());

        install(&env, ".XNAT_CHECK_RUNNING_STATUS", "#!/bin/sh\nexit 1\n");
        assert!(!gate.is_queued_or_running(&unit).unwrap());

        install(&env, ".XNAT_CHECK_RUNNING_STATUS", "#!/bin/sh\nexit 3\n");
        assert!(gate.is_queued_or_running(&unit).is_err());
    }

    #[test]
    fn mark_queued_passes_put_server_host() {
        let root = TempDir::new().expect("temp dir");
        let env = testing::environment(root.path());
        let log = root.path().join("mark.txt");
        install(&env, ".XNAT_MARK_RUNNING_STATUS", &format!("#!/bin/sh\necho \"$@\" > {}\n", log.display()));

        let gate = ProgramRunStatusGate::new(&env, "Pipe");
        let unit = WorkUnitIdentity::new("P", "S", "C");
        gate.mark_queued(&unit, &testing::config(ProcessingStage::CheckData)).unwrap();

        let args = fs::read_to_string(Path::new(&log)).unwrap();
        assert_eq!(
            args.trim(),
            "--user=tester --password=secret --server=put1.example.org --project=P --subject=S --classifier=C --resource=RunningStatus --queued"
        );
    }
}
