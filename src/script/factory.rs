use std::path::PathBuf;

use serde::Serialize;

use crate::archive::server_name;
use crate::environment::{path_str, Environment};
use crate::script::render::{self, render, render_with_header};
use crate::script::{JobScript, RenderError, ResourceHints};
use crate::settings::{output_resource_name, SubmissionConfig};
use crate::unit::WorkUnitIdentity;
use crate::workspace::Workspace;

/// Everything a stage script is rendered from
pub struct RenderContext<'a> {
    pub env: &'a Environment,
    pub unit: &'a WorkUnitIdentity,
    pub config: &'a SubmissionConfig,
    pub workspace: &'a Workspace,
}

impl RenderContext<'_> {
    /// `<working dir>/<subject>_<classifier>`, the session directory the get data job fills
    pub fn session_dir(&self) -> String {
        path_str(&self.workspace.working_dir.join(self.unit.session()))
    }

    /// Scripts for the first four stages live in the working directory and share this stem
    pub fn scripts_start_name(&self, pipeline: &str) -> String {
        let start = self.workspace.working_dir.join(format!("{}.{}", self.unit.stem(), pipeline));
        path_str(&start)
    }

    fn script_path(&self, pipeline: &str, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.scripts_start_name(pipeline), suffix))
    }

    /// Fields shared by the scripts that run inside the XNAT container
    pub fn container_base(&self, program: PathBuf, resources: ResourceHints) -> ContainerBase {
        ContainerBase {
            resources: resources.to_string(),
            setup_script: path_str(&self.env.setup_script()),
            db_name: self.env.db_name.clone(),
            singularity_version: self.env.singularity_version.clone(),
            archive_root: path_str(&self.env.archive_root),
            bind_path: self.env.bind_path.clone(),
            xnat_container: path_str(&self.env.xnat_container_path),
            program: path_str(&program),
            project: self.unit.project.clone(),
            subject: self.unit.subject.clone(),
            classifier: self.unit.classifier.clone(),
            session: self.unit.session(),
            scan: self.unit.scan.clone(),
            working_dir: path_str(&self.workspace.working_dir),
            session_dir: self.session_dir(),
        }
    }

    fn credentials(&self) -> Credentials {
        Credentials {
            user: self.config.username.clone(),
            password: self.config.password.clone(),
            put_server: server_name(&self.config.put_server).to_string(),
            log_dir: path_str(&self.env.log_dir),
        }
    }
}

#[derive(Serialize)]
pub struct ContainerBase {
    pub resources: String,
    pub setup_script: String,
    pub db_name: String,
    pub singularity_version: String,
    pub archive_root: String,
    pub bind_path: String,
    pub xnat_container: String,
    pub program: String,
    pub project: String,
    pub subject: String,
    pub classifier: String,
    pub session: String,
    pub scan: Option<String>,
    pub working_dir: String,
    pub session_dir: String,
}

#[derive(Serialize)]
struct Credentials {
    user: String,
    password: String,
    put_server: String,
    log_dir: String,
}

/// Rendering context for the clean data script
#[derive(Serialize)]
struct CleanContext {
    resources: String,
    working_dir: String,
    session_dir: String,
    session: String,
}

/// Rendering context for the put data script
#[derive(Serialize)]
struct PutContext {
    #[serde(flatten)]
    base: ContainerBase,
    #[serde(flatten)]
    credentials: Credentials,
    pipeline: String,
    output_resource_suffix: String,
    output_resource_name: String,
}

/// Rendering context for the check data script
#[derive(Serialize)]
struct CheckContext {
    #[serde(flatten)]
    base: ContainerBase,
    #[serde(flatten)]
    credentials: Credentials,
    check_data_dir: String,
    fieldmap: Option<String>,
}

/// Rendering context for the mark complete script
#[derive(Serialize)]
struct MarkCompleteContext {
    #[serde(flatten)]
    base: ContainerBase,
    #[serde(flatten)]
    credentials: Credentials,
    mark_completion_dir: String,
}

/// Renders the job script for each pipeline stage
///
/// Only the process data stage has no shared script: its command line carries the
/// pipeline-specific parameters. The other stages have default scripts that pipelines may
/// replace. Rendering only produces text; writing and submitting are up to the caller.
pub trait ScriptFactory {
    fn pipeline_name(&self) -> &str;

    fn render_get_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let pipeline = self.pipeline_name();
        let resources = ResourceHints::STANDARD;
        let base = ctx.container_base(ctx.env.pipeline_program(pipeline, ".XNAT_GET"), resources);
        Ok(JobScript {
            path: get_data_script_path(ctx, pipeline),
            content: render_with_header("get_data", render::GET_DATA, &base)?,
            resources,
        })
    }

    fn render_process_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError>;

    fn render_clean_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let resources = ResourceHints::STANDARD;
        let context = CleanContext {
            resources: resources.to_string(),
            working_dir: path_str(&ctx.workspace.working_dir),
            session_dir: ctx.session_dir(),
            session: ctx.unit.session(),
        };
        Ok(JobScript {
            path: ctx.script_path(self.pipeline_name(), ".CLEAN_DATA_job.sh"),
            content: render_with_header("clean_data", render::CLEAN_DATA, &context)?,
            resources,
        })
    }

    fn render_put_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let pipeline = self.pipeline_name();
        let resources = ResourceHints::PUT;
        let context = PutContext {
            base: ctx.container_base(ctx.env.put_program(), resources),
            credentials: ctx.credentials(),
            pipeline: pipeline.to_string(),
            output_resource_suffix: ctx.config.output_resource_suffix.clone(),
            output_resource_name: output_resource_name(ctx.unit.scan.as_deref(), &ctx.config.output_resource_suffix),
        };
        Ok(JobScript {
            path: ctx.script_path(pipeline, ".XNAT_PUT_DATA_job.sh"),
            content: render("put_data", render::PUT_DATA, &context)?,
            resources,
        })
    }

    /// Field map type passed to the checker when the unit has no scan, `None` to omit it
    fn check_data_fieldmap(&self, _ctx: &RenderContext) -> Result<Option<String>, RenderError> {
        Ok(None)
    }

    fn render_check_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let pipeline = self.pipeline_name();
        let resources = ResourceHints::STANDARD;
        let context = CheckContext {
            base: ctx.container_base(ctx.env.pipeline_program(pipeline, ".XNAT_CHECK"), resources),
            credentials: ctx.credentials(),
            check_data_dir: path_str(&ctx.workspace.check_data_dir),
            fieldmap: self.check_data_fieldmap(ctx)?,
        };
        let name = format!("{}.{}.XNAT_CHECK_DATA_job.sh", ctx.unit.stem(), pipeline);
        Ok(JobScript {
            path: ctx.workspace.check_data_dir.join(name),
            content: render_with_header("check_data", render::CHECK_DATA, &context)?,
            resources,
        })
    }

    fn render_mark_complete(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
        let pipeline = self.pipeline_name();
        let resources = ResourceHints::STANDARD;
        let context = MarkCompleteContext {
            base: ctx.container_base(ctx.env.pipeline_program(pipeline, ".XNAT_MARK_RUNNING_STATUS"), resources),
            credentials: ctx.credentials(),
            mark_completion_dir: path_str(&ctx.workspace.mark_completion_dir),
        };
        let name = format!("{}.{}.MARK_COMPLETE_RUNNING_STATUS_job.sh", ctx.unit.stem(), pipeline);
        Ok(JobScript {
            path: ctx.workspace.mark_completion_dir.join(name),
            content: render_with_header("mark_complete", render::MARK_COMPLETE, &context)?,
            resources,
        })
    }
}

pub fn get_data_script_path(ctx: &RenderContext, pipeline: &str) -> PathBuf {
    ctx.script_path(pipeline, ".XNAT_GET_DATA_job.sh")
}

pub fn process_data_script_path(ctx: &RenderContext, pipeline: &str) -> PathBuf {
    ctx.script_path(pipeline, ".PROCESS_DATA_job.sh")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::stage::ProcessingStage;
    use crate::testing;

    /// Factory that only has the shared scripts
    struct Plain;

    impl ScriptFactory for Plain {
        fn pipeline_name(&self) -> &str {
            "Pipe"
        }

        fn render_process_data(&self, ctx: &RenderContext) -> Result<JobScript, RenderError> {
            Ok(JobScript {
                path: process_data_script_path(ctx, self.pipeline_name()),
                content: "true\n".to_string(),
                resources: ResourceHints::STANDARD,
            })
        }
    }

    fn workspace() -> Workspace {
        Workspace::derive(Path::new("/build"), "Pipe", &WorkUnitIdentity::new("P", "S", "C"), 1700000000)
    }

    #[test]
    fn get_data_script_text() {
        let env = testing::environment(Path::new("/site"));
        let unit = WorkUnitIdentity::new("P", "S", "C");
        let config = testing::config(ProcessingStage::CheckData);
        let workspace = workspace();
        let ctx = RenderContext { env: &env, unit: &unit, config: &config, workspace: &workspace };

        let script = Plain.render_get_data(&ctx).unwrap();
        let wd = "/build/P/Pipe.S_C.1700000000.XNAT_PROCESS_DATA";
        assert_eq!(script.path, PathBuf::from(format!("{wd}/S_C.Pipe.XNAT_GET_DATA_job.sh")));
        assert_eq!(
            script.content,
            format!(
                "#PBS -S /bin/bash\n\n\
                 #PBS -l nodes=1:ppn=1,walltime=4:00:00,mem=4gb\n\
                 #PBS -o {wd}\n\
                 #PBS -e {wd}\n\
                 \n\
                 source /site/control/xnat_pbs_setup intradb\n\
                 module load singularity/3.8\n\
                 \n\
                 singularity exec -B /site/archive,/site/bind /site/xnat.sif /site/jobs/Pipe/Pipe.XNAT_GET \\\n\
                 \x20 --project=P \\\n\
                 \x20 --subject=S \\\n\
                 \x20 --classifier=C \\\n\
                 \x20 --working-dir={wd}\n"
            )
        );
    }

    #[test]
    fn put_data_resource_suffix_depends_on_scan() {
        let env = testing::environment(Path::new("/site"));
        let config = testing::config(ProcessingStage::CheckData);
        let workspace = workspace();

        let unit = WorkUnitIdentity::new("P", "S", "C");
        let ctx = RenderContext { env: &env, unit: &unit, config: &config, workspace: &workspace };
        let script = Plain.render_put_data(&ctx).unwrap();
        assert!(!script.content.starts_with("#PBS -S"));
        assert!(script.content.starts_with("#PBS -l nodes=1:ppn=1,walltime=4:00:00,mem=12gb\n#PBS -o /site/logs\n"));
        assert!(script.content.contains("  --server=\"put1.example.org\" \\\n"));
        assert!(script.content.contains("  --working-dir=\"/build/P/Pipe.S_C.1700000000.XNAT_PROCESS_DATA\" \\\n  --resource-suffix=\"Structural_preproc\" \\\n  --reason=\"Pipe\""));
        assert!(!script.content.contains("--scan="));
        assert!(script.content.ends_with("  --reason=\"Pipe\"\n"));

        let unit = WorkUnitIdentity::new("P", "S", "C").with_scan(Some("tfMRI_WM".into()));
        let ctx = RenderContext { env: &env, unit: &unit, config: &config, workspace: &workspace };
        let script = Plain.render_put_data(&ctx).unwrap();
        assert!(script.content.contains("  --scan=\"tfMRI_WM\" \\\n  --resource-suffix=\"Structural_preproc\" \\\n"));
        assert!(script.path.ends_with("S_C_tfMRI_WM.Pipe.XNAT_PUT_DATA_job.sh"));
    }

    #[test]
    fn check_and_mark_scripts_live_in_their_own_directories() {
        let env = testing::environment(Path::new("/site"));
        let unit = WorkUnitIdentity::new("P", "S", "C");
        let config = testing::config(ProcessingStage::CheckData);
        let workspace = workspace();
        let ctx = RenderContext { env: &env, unit: &unit, config: &config, workspace: &workspace };

        let check = Plain.render_check_data(&ctx).unwrap();
        assert_eq!(check.path, workspace.check_data_dir.join("S_C.Pipe.XNAT_CHECK_DATA_job.sh"));
        assert!(!check.content.contains("--fieldmap"));
        assert!(check.content.ends_with(&format!("  --working-dir={}\n", workspace.check_data_dir.display())));

        let mark = Plain.render_mark_complete(&ctx).unwrap();
        assert_eq!(mark.path, workspace.mark_completion_dir.join("S_C.Pipe.MARK_COMPLETE_RUNNING_STATUS_job.sh"));
        assert!(mark.content.contains("  --resource=\"RunningStatus\" \\\n  --done\n\nrm -rf "));
        assert!(mark.content.ends_with(&format!("rm -rf {}", workspace.mark_completion_dir.display())));
    }

    #[test]
    fn clean_script_keeps_results_and_processing_info() {
        let env = testing::environment(Path::new("/site"));
        let unit = WorkUnitIdentity::new("P", "S", "C");
        let config = testing::config(ProcessingStage::CheckData);
        let workspace = workspace();
        let ctx = RenderContext { env: &env, unit: &unit, config: &config, workspace: &workspace };

        let script = Plain.render_clean_data(&ctx).unwrap();
        let s = format!("{}/S_C", workspace.working_dir.display());
        assert!(script.content.contains(&format!("mv {s}/S_C/MNINonLinear {s}\n")));
        assert!(script.content.contains(&format!(
            "find {s} -not -path \"{s}/T*w/*\" -not -path \"{s}/ProcessingInfo/*\" -not -path \"{s}/MNINonLinear/*\" -delete\n"
        )));
        assert!(script.content.ends_with(&format!("echo \"Remaining files:\"\nfind {s}\n")));
    }
}
