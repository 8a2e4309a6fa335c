use std::fs;

use log::{debug, info};
use serde::Serialize;

use crate::discovery;
use crate::environment::path_str;
use crate::script::factory::{get_data_script_path, process_data_script_path, ContainerBase, RenderContext, ScriptFactory};
use crate::script::render::{render, render_with_header};
use crate::script::{JobScript, RenderError, ResourceHints};
use crate::settings::PipelineOptions;

/// included structural get data template
static GET_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/structural_get_data.txt"));
/// included structural process data template
static PROCESS_DATA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/structural_process_data.txt"));

pub const PIPELINE_NAME: &str = "StructuralPreprocessing";

/// Structural preprocessing (PreFreeSurfer, FreeSurfer, PostFreeSurfer) run through QuNex
///
/// The process data job runs on scratch space: the working directory is moved to
/// `<scratch>/<project>` before the container starts and moved back into build space afterwards.
pub struct StructuralPreprocessing {
    options: PipelineOptions,
}

/// Rendering context for the structural get data script
#[derive(Serialize)]
struct GetDataContext {
    #[serde(flatten)]
    base: ContainerBase,
    use_prescan_normalized: bool,
}

/// Rendering context for the structural process data script
#[derive(Serialize)]
struct ProcessDataContext {
    resources: String,
    working_dir: String,
    singularity_version: String,
    archive_root: String,
    bind_path: String,
    gradient_coefficient_path: String,
    container: String,
    qunex_run: String,
    qunex_parameter_folder: String,
    scratch_project_dir: String,
    processing_dir_name: String,
    project_build_dir: String,
    session: String,
    pipeline: String,
}

impl StructuralPreprocessing {
    pub fn new(options: PipelineOptions) -> Self {
        debug!("Structural preprocessing options: {:?}", options);
        StructuralPreprocessing { options }
    }
}

impl ScriptFactory for StructuralPreprocessing {
    fn pipeline_name(&self) -> &str {
        PIPELINE_NAME
    }

    fn render_get_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let resources = ResourceHints::STANDARD;
        let context = GetDataContext {
            base: ctx.container_base(ctx.env.pipeline_program(PIPELINE_NAME, ".XNAT_GET"), resources),
            use_prescan_normalized: self.options.use_prescan_normalized,
        };
        Ok(JobScript {
            path: get_data_script_path(ctx, PIPELINE_NAME),
            content: render_with_header("structural_get_data", GET_DATA, &context)?,
            resources,
        })
    }

    fn render_process_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let project_build_dir = ctx.env.build_home.join(&ctx.unit.project);
        let scratch_project_dir = ctx.env.scratch_dir.join(&ctx.unit.project);
        if !scratch_project_dir.exists() {
            info!("Creating scratch processing directory {}", scratch_project_dir.display());
            fs::create_dir_all(&scratch_project_dir).map_err(|source| RenderError::Io {
                path: scratch_project_dir.clone(),
                source,
            })?;
        }

        let working_dir = &ctx.workspace.working_dir;
        let processing_dir_name = working_dir
            .strip_prefix(&project_build_dir)
            .unwrap_or(working_dir.as_path());

        let resources = ResourceHints {
            feature: Some("haswell"),
            walltime_hours: ctx.config.walltime_hours,
            mem_gbs: ctx.config.mem_gbs,
            ..ResourceHints::STANDARD
        };
        let context = ProcessDataContext {
            resources: resources.to_string(),
            working_dir: path_str(working_dir),
            singularity_version: ctx.env.singularity_version.clone(),
            archive_root: path_str(&ctx.env.archive_root),
            bind_path: ctx.env.bind_path.clone(),
            gradient_coefficient_path: path_str(&ctx.env.gradient_coefficient_path),
            container: path_str(&ctx.env.container_path),
            qunex_run: path_str(&ctx.env.qunex_run_path),
            qunex_parameter_folder: path_str(&ctx.env.qunex_parameter_path),
            scratch_project_dir: path_str(&scratch_project_dir),
            processing_dir_name: path_str(processing_dir_name),
            project_build_dir: path_str(&project_build_dir),
            session: ctx.unit.session(),
            pipeline: PIPELINE_NAME.to_string(),
        };
        Ok(JobScript {
            path: process_data_script_path(ctx, PIPELINE_NAME),
            content: render("structural_process_data", PROCESS_DATA, &context)?,
            resources,
        })
    }

    /// Detected from `FieldmapDir` when configured, `NONE` otherwise
    fn check_data_fieldmap(&self, _ctx: &RenderContext) -> Result<Option<String>, RenderError> {
        let kind = match &self.options.fieldmap_dir {
            Some(dir) => discovery::discover(dir)?.kind(),
            None => discovery::FieldMapKind::None,
        };
        Ok(Some(kind.to_string()))
    }
}
