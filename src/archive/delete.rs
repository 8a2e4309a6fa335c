use std::path::{Path, PathBuf};

use log::info;

use crate::archive::{failed, run, server_name, ArchiveError};
use crate::settings::SubmissionConfig;
use crate::unit::WorkUnitIdentity;

/// Removes an existing resource from a session
pub trait ResourceDeleter {
    fn delete_resource(&self, config: &SubmissionConfig, unit: &WorkUnitIdentity, resource: &str) -> Result<(), ArchiveError>;
}

/// Runs a site delete program with `--user --password --server --project --subject --session
/// --resource` arguments
pub struct ProgramResourceDeleter {
    program: Option<PathBuf>,
}

impl ProgramResourceDeleter {
    pub fn new(program: Option<&Path>) -> Self {
        ProgramResourceDeleter { program: program.map(Path::to_path_buf) }
    }
}

impl ResourceDeleter for ProgramResourceDeleter {
    fn delete_resource(&self, config: &SubmissionConfig, unit: &WorkUnitIdentity, resource: &str) -> Result<(), ArchiveError> {
        let program = self.program.as_ref().ok_or_else(|| ArchiveError::NoDeleteProgram {
            resource: resource.to_string(),
        })?;

        info!("Deleting resource: {resource} for:");
        info!("  project: {}", unit.project);
        info!("  subject: {}", unit.subject);
        info!("  session: {}", unit.session());

        let arguments = vec![
            format!("--user={}", config.username),
            format!("--password={}", config.password),
            format!("--server={}", server_name(&config.server)),
            format!("--project={}", unit.project),
            format!("--subject={}", unit.subject),
            format!("--session={}", unit.session()),
            format!("--resource={resource}"),
        ];
        let output = run(program, &arguments)?;
        if !output.status.success() {
            return Err(failed(program, &output));
        }
        Ok(())
    }
}
