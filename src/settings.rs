//! Per-unit submission settings
//!
//! Settings are read from a JSON file with a `Defaults` object and a `Subjects` object keyed by
//! subject id. A subject entry overrides the defaults field by field. Nothing is defaulted beyond
//! what the file says: a required field that is still missing after merging is an error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use crate::stage::{InvalidStageError, ProcessingStage};

/// Everything one orchestration run needs beyond the work unit itself
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    pub username: String,
    pub password: String,
    /// Archive server, including scheme
    pub server: String,
    /// Ingest server picked for this unit's PUT and status jobs
    pub put_server: String,
    pub clean_output_first: bool,
    pub walltime_hours: u32,
    pub mem_gbs: u32,
    pub output_resource_suffix: String,
    pub processing_stage: ProcessingStage,
}

/// Options only some pipelines read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    pub use_prescan_normalized: bool,
    pub brain_size: Option<u32>,
    pub fieldmap_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct UnitSettings {
    pub clean_output_first: Option<bool>,
    pub processing_stage: Option<String>,
    pub walltime_limit_hours: Option<u32>,
    pub mem_limit_gbs: Option<u32>,
    pub output_resource_suffix: Option<String>,
    pub scan: Option<String>,
    pub use_prescan_normalized: Option<bool>,
    pub brain_size: Option<u32>,
    pub fieldmap_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default)]
    pub defaults: UnitSettings,
    #[serde(default)]
    pub subjects: HashMap<String, UnitSettings>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required setting {field} for subject {subject}")]
    Missing { subject: String, field: &'static str },
    #[error(transparent)]
    Stage(#[from] InvalidStageError),
}

/// Settings for one subject after the defaults have been applied
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub clean_output_first: bool,
    pub processing_stage: ProcessingStage,
    pub walltime_hours: u32,
    pub mem_gbs: u32,
    pub output_resource_suffix: String,
    pub scan: Option<String>,
    pub options: PipelineOptions,
}

/// Credentials and servers shared by every unit in one batch
#[derive(Debug, Clone)]
pub struct Connection {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl SettingsFile {
    pub fn load(path: &Path) -> anyhow::Result<SettingsFile> {
        info!("Reading configuration from file: {}", path.display());
        let json = fs::read_to_string(path)?;
        let settings: SettingsFile = serde_json::from_str(&json)?;
        debug!("{} subject overrides loaded", settings.subjects.len());
        Ok(settings)
    }

    /// Merge the subject's overrides onto the defaults and check required fields
    ///
    /// `stage_override` replaces the configured stage (the `--stage` command line option), so a
    /// bad stage name in the file is not an error when it is overridden.
    pub fn resolve(&self, subject: &str, stage_override: Option<ProcessingStage>) -> Result<ResolvedSettings, SettingsError> {
        let empty = UnitSettings::default();
        let own = self.subjects.get(subject).unwrap_or(&empty);
        let d = &self.defaults;

        let missing = |field: &'static str| SettingsError::Missing { subject: subject.to_string(), field };

        let processing_stage = match stage_override {
            Some(stage) => stage,
            None => own.processing_stage.as_ref()
                .or(d.processing_stage.as_ref())
                .ok_or_else(|| missing("ProcessingStage"))?
                .parse()?,
        };

        Ok(ResolvedSettings {
            clean_output_first: own.clean_output_first.or(d.clean_output_first)
                .ok_or_else(|| missing("CleanOutputFirst"))?,
            processing_stage,
            walltime_hours: own.walltime_limit_hours.or(d.walltime_limit_hours)
                .ok_or_else(|| missing("WalltimeLimitHours"))?,
            mem_gbs: own.mem_limit_gbs.or(d.mem_limit_gbs)
                .ok_or_else(|| missing("MemLimitGbs"))?,
            output_resource_suffix: own.output_resource_suffix.clone()
                .or_else(|| d.output_resource_suffix.clone())
                .ok_or_else(|| missing("OutputResourceSuffix"))?,
            scan: own.scan.clone().or_else(|| d.scan.clone()),
            options: PipelineOptions {
                use_prescan_normalized: own.use_prescan_normalized.or(d.use_prescan_normalized).unwrap_or(false),
                brain_size: own.brain_size.or(d.brain_size),
                fieldmap_dir: own.fieldmap_dir.clone().or_else(|| d.fieldmap_dir.clone()),
            },
        })
    }
}

impl ResolvedSettings {
    pub fn submission_config(&self, connection: &Connection, put_server: &str) -> SubmissionConfig {
        SubmissionConfig {
            username: connection.username.clone(),
            password: connection.password.clone(),
            server: connection.server.clone(),
            put_server: put_server.to_string(),
            clean_output_first: self.clean_output_first,
            walltime_hours: self.walltime_hours,
            mem_gbs: self.mem_gbs,
            output_resource_suffix: self.output_resource_suffix.clone(),
            processing_stage: self.processing_stage,
        }
    }
}

/// Resource name the PUT job writes and the clean-first step deletes
pub fn output_resource_name(scan: Option<&str>, suffix: &str) -> String {
    match scan {
        Some(scan) => format!("{scan}_{suffix}"),
        None => suffix.to_string(),
    }
}
