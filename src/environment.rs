//! Site locations the job scripts are rendered against
//!
//! Every value is required. They are read once at startup (command line, falling back to the
//! process environment) and passed down by reference.

use std::path::{Path, PathBuf};

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct Environment {
    /// Home of the per-pipeline XNAT job programs
    #[arg(long, env = "XNAT_PBS_JOBS")]
    pub jobs_home: PathBuf,

    /// Where PUT, CHECK and status jobs write their scheduler logs
    #[arg(long, env = "XNAT_PBS_JOBS_LOG_DIR")]
    pub log_dir: PathBuf,

    /// Build space root, working directories are created below it
    #[arg(long, env = "XNAT_PBS_JOBS_BUILD_DIR")]
    pub build_home: PathBuf,

    /// Directory holding the xnat_pbs_setup script
    #[arg(long, env = "XNAT_PBS_JOBS_CONTROL")]
    pub control_dir: PathBuf,

    #[arg(long, env = "XNAT_PBS_JOBS_ARCHIVE_ROOT")]
    pub archive_root: PathBuf,

    /// Database name handed to the setup script
    #[arg(long, env = "REQUESTED_XNAT_SERVER")]
    pub db_name: String,

    #[arg(long, env = "SINGULARITY_CONTAINER_VERSION")]
    pub singularity_version: String,

    #[arg(long, env = "SINGULARITY_CONTAINER_PATH")]
    pub container_path: PathBuf,

    #[arg(long, env = "SINGULARITY_CONTAINER_XNAT_PATH")]
    pub xnat_container_path: PathBuf,

    #[arg(long, env = "SINGULARITY_BIND_PATH")]
    pub bind_path: String,

    #[arg(long, env = "SINGULARITY_QUNEXRUN_PATH")]
    pub qunex_run_path: PathBuf,

    #[arg(long, env = "SINGULARITY_QUNEXPARAMETER_PATH")]
    pub qunex_parameter_path: PathBuf,

    #[arg(long, env = "GRADIENT_COEFFICIENT_PATH")]
    pub gradient_coefficient_path: PathBuf,

    #[arg(long, env = "SCRATCH_PROCESSING_DIR")]
    pub scratch_dir: PathBuf,
}

impl Environment {
    pub fn setup_script(&self) -> PathBuf {
        self.control_dir.join("xnat_pbs_setup")
    }

    /// `<jobs home>/<pipeline>/<pipeline><suffix>`, e.g. the `.XNAT_GET` program
    pub fn pipeline_program(&self, pipeline: &str, suffix: &str) -> PathBuf {
        self.jobs_home.join(pipeline).join(format!("{pipeline}{suffix}"))
    }

    pub fn put_program(&self) -> PathBuf {
        self.jobs_home.join("WorkingDirPut").join("XNAT_working_dir_put.sh")
    }
}

/// Lossy string form of a path for embedding in script text
pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
