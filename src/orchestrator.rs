//! Staged submission of one work unit's pipeline jobs
//!
//! The pipeline is a fixed chain: get data, process data, clean data, put data, check data. A
//! stage is submitted when the requested stage is at or beyond it, each submitted stage waits for
//! the previous submitted one to succeed (`afterok`). A final job clears the unit's running status
//! marker and waits for the chain to end however it ended (`afterany`).

use std::fmt;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::archive::delete::ResourceDeleter;
use crate::archive::status::RunStatusGate;
use crate::archive::ArchiveError;
use crate::environment::Environment;
use crate::scheduler::{Dependency, JobId, SchedulerClient, SchedulerError};
use crate::script::factory::{RenderContext, ScriptFactory};
use crate::script::{JobScript, RenderError};
use crate::settings::{output_resource_name, SubmissionConfig};
use crate::stage::ProcessingStage;
use crate::unit::WorkUnitIdentity;
use crate::workspace::{Clock, Workspace, WorkspaceAllocator, WorkspaceError};

/// Manifest label of the job that clears the running status marker
pub const MARK_COMPLETE_LABEL: &str = "Complete Running Status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub label: String,
    pub job_ids: Vec<JobId>,
}

/// Stages that were submitted, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SubmissionManifest(Vec<ManifestEntry>);

impl SubmissionManifest {
    fn push(&mut self, label: &str, job: JobId) {
        self.0.push(ManifestEntry { label: label.to_string(), job_ids: vec![job] });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.0
    }

    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.label.as_str()).collect()
    }
}

impl fmt::Display for SubmissionManifest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for entry in &self.0 {
            let ids: Vec<&str> = entry.job_ids.iter().map(JobId::as_str).collect();
            writeln!(f, "{}: {}", entry.label, ids.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{unit}: {source}")]
    Workspace {
        unit: String,
        #[source]
        source: WorkspaceError,
    },
    #[error("{unit}: {source}")]
    Render {
        unit: String,
        #[source]
        source: RenderError,
    },
    #[error("{unit}: cannot mark as queued: {source}")]
    MarkQueued {
        unit: String,
        #[source]
        source: ArchiveError,
    },
    /// The unit was already marked queued, so the mark complete job is still submitted
    #[error("{unit}: cannot delete output resource {resource}{}: {source}", cleanup_note(.cleanup))]
    CleanOutput {
        unit: String,
        resource: String,
        #[source]
        source: ArchiveError,
        cleanup: Option<JobId>,
    },
    /// A stage was refused by the scheduler. `cleanup` is the mark complete job submitted
    /// afterwards, if the scheduler took it.
    #[error("{unit}: {stage} submission failed{}: {source}", cleanup_note(.cleanup))]
    Scheduler {
        unit: String,
        stage: &'static str,
        #[source]
        source: SchedulerError,
        cleanup: Option<JobId>,
    },
}

fn cleanup_note(cleanup: &Option<JobId>) -> String {
    match cleanup {
        Some(job) => format!(" (mark complete job {job} queued)"),
        None => String::new(),
    }
}

/// External programs the orchestrator calls
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub scheduler: &'a dyn SchedulerClient,
    pub gate: &'a dyn RunStatusGate,
    pub deleter: &'a dyn ResourceDeleter,
}

/// Rendered scripts of one run
struct StageScripts {
    get_data: JobScript,
    process_data: JobScript,
    clean_data: JobScript,
    put_data: JobScript,
    check_data: JobScript,
    mark_complete: JobScript,
}

impl StageScripts {
    fn pipeline(&self) -> [(ProcessingStage, &JobScript); 5] {
        [
            (ProcessingStage::GetData, &self.get_data),
            (ProcessingStage::ProcessData, &self.process_data),
            (ProcessingStage::CleanData, &self.clean_data),
            (ProcessingStage::PutData, &self.put_data),
            (ProcessingStage::CheckData, &self.check_data),
        ]
    }

    fn all(&self) -> [&JobScript; 6] {
        [&self.get_data, &self.process_data, &self.clean_data, &self.put_data, &self.check_data, &self.mark_complete]
    }
}

/// Submits the pipeline for one work unit, once
pub struct StagedOrchestrator<'a> {
    env: &'a Environment,
    factory: &'a dyn ScriptFactory,
    services: Services<'a>,
    unit: WorkUnitIdentity,
    allocator: WorkspaceAllocator,
}

impl<'a> StagedOrchestrator<'a> {
    pub fn new(env: &'a Environment, factory: &'a dyn ScriptFactory, services: Services<'a>, unit: WorkUnitIdentity, clock: Clock) -> Self {
        let allocator = WorkspaceAllocator::new(&env.build_home, factory.pipeline_name(), &unit, clock);
        StagedOrchestrator { env, factory, services, unit, allocator }
    }

    /// Working directories of this run, derived on first use
    pub fn workspace(&self) -> &Workspace {
        self.allocator.allocate()
    }

    /// Render, write and submit every job up to the configured stage
    ///
    /// Consumes the orchestrator: a second run would derive a new workspace and submit the whole
    /// pipeline again.
    pub fn submit_jobs(self, config: &SubmissionConfig) -> Result<SubmissionManifest, SubmitError> {
        let unit = self.unit.to_string();
        let pipeline = self.factory.pipeline_name();
        info!("----------");
        info!("Submitting {} jobs for", pipeline);
        info!("  Project: {}", self.unit.project);
        info!("  Subject: {}", self.unit.subject);
        info!("  Session: {}", self.unit.session());
        if let Some(scan) = &self.unit.scan {
            info!("  Scan: {}", scan);
        }
        info!("  Stage: {}", config.processing_stage);
        info!("----------");

        let workspace = self.workspace();
        info!("Working directory: {}", workspace.working_dir.display());
        info!("Check data directory: {}", workspace.check_data_dir.display());
        info!("Mark completion directory: {}", workspace.mark_completion_dir.display());
        workspace
            .create()
            .map_err(|source| SubmitError::Workspace { unit: unit.clone(), source })?;

        let scripts = self
            .write_scripts(config, workspace)
            .map_err(|source| SubmitError::Render { unit: unit.clone(), source })?;

        if config.processing_stage > ProcessingStage::PrepareScripts {
            self.services
                .gate
                .mark_queued(&self.unit, config)
                .map_err(|source| SubmitError::MarkQueued { unit: unit.clone(), source })?;
        }

        let resource = output_resource_name(self.unit.scan.as_deref(), &config.output_resource_suffix);
        info!("Output resource: {}", resource);
        if config.clean_output_first {
            info!("Deleting output resource {} before submitting", resource);
            if let Err(source) = self.services.deleter.delete_resource(config, &self.unit, &resource) {
                let cleanup = self.submit_cleanup(&scripts.mark_complete, None);
                return Err(SubmitError::CleanOutput { unit, resource, source, cleanup });
            }
        }

        let mut manifest = SubmissionManifest::default();
        let mut prior: Option<JobId> = None;
        for (stage, script) in scripts.pipeline() {
            if config.processing_stage < stage {
                info!("Not submitting {} job, requested stage is {}", stage, config.processing_stage);
                continue;
            }
            let dependency = prior.as_ref().map(Dependency::after_ok);
            match self.services.scheduler.submit(&script.path, dependency.as_ref()) {
                Ok(job) => {
                    info!("Submitted {} job: {}", stage, job);
                    manifest.push(stage.name(), job.clone());
                    prior = Some(job);
                }
                Err(source) => {
                    let cleanup = self.submit_cleanup(&scripts.mark_complete, prior.as_ref());
                    return Err(SubmitError::Scheduler { unit, stage: stage.name(), source, cleanup });
                }
            }
        }

        let dependency = prior.as_ref().map(Dependency::after_any);
        let job = self
            .services
            .scheduler
            .submit(&scripts.mark_complete.path, dependency.as_ref())
            .map_err(|source| SubmitError::Scheduler { unit: unit.clone(), stage: MARK_COMPLETE_LABEL, source, cleanup: None })?;
        info!("Submitted mark complete job: {}", job);
        manifest.push(MARK_COMPLETE_LABEL, job);

        info!("Submitted {}", manifest.labels().join(", "));
        Ok(manifest)
    }

    /// Every script is rendered and written, submitted or not, so an operator can run the rest
    /// by hand later
    fn write_scripts(&self, config: &SubmissionConfig, workspace: &Workspace) -> Result<StageScripts, RenderError> {
        let ctx = RenderContext { env: self.env, unit: &self.unit, config, workspace };
        let scripts = StageScripts {
            get_data: self.factory.render_get_data(&ctx)?,
            process_data: self.factory.render_process_data(&ctx)?,
            clean_data: self.factory.render_clean_data(&ctx)?,
            put_data: self.factory.render_put_data(&ctx)?,
            check_data: self.factory.render_check_data(&ctx)?,
            mark_complete: self.factory.render_mark_complete(&ctx)?,
        };
        for script in scripts.all() {
            script.write()?;
        }
        Ok(scripts)
    }

    /// Queue the mark complete job after a failure so the running marker is still cleared
    fn submit_cleanup(&self, mark_complete: &JobScript, prior: Option<&JobId>) -> Option<JobId> {
        let dependency = prior.map(Dependency::after_any);
        match self.services.scheduler.submit(&mark_complete.path, dependency.as_ref()) {
            Ok(job) => {
                warn!("Submission of {} failed, submitted mark complete job {}", self.unit, job);
                Some(job)
            }
            Err(e) => {
                warn!("Submission of {} failed and mark complete job was refused too, unit stays marked running: {}", self.unit, e);
                None
            }
        }
    }
}
