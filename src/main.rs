use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};

use crate::archive::delete::ProgramResourceDeleter;
use crate::archive::status::ProgramRunStatusGate;
use crate::db::ledger::Ledger;
use crate::driver::{BatchDriver, UnitOutcome};
use crate::environment::Environment;
use crate::orchestrator::Services;
use crate::pipeline::PipelineKind;
use crate::scheduler::qsub::Qsub;
use crate::settings::{Connection, SettingsFile};
use crate::stage::ProcessingStage;
use crate::unit::{read_unit_list, WorkUnitIdentity};

mod archive;
mod db;
mod discovery;
mod driver;
mod environment;
mod orchestrator;
mod pipeline;
mod scheduler;
mod script;
mod settings;
mod stage;
mod unit;
mod workspace;
#[cfg(test)]
mod testing;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
/// Submit XNAT pipeline jobs to a PBS scheduler, one staged job chain per work unit
struct Args {
    #[command(flatten)]
    env: Environment,

    #[arg(long, value_enum, default_value_t = PipelineKind::StructuralPreprocessing)]
    pipeline: PipelineKind,

    /// JSON file with Defaults and per-subject settings
    #[arg(short, long)]
    config: PathBuf,

    /// A single work unit, project:subject:classifier[:extra]
    #[arg(short, long, conflicts_with = "subjects", required_unless_present = "subjects")]
    unit: Option<WorkUnitIdentity>,

    /// File with one work unit per line
    #[arg(short, long)]
    subjects: Option<PathBuf>,

    /// Submit up to this stage instead of the configured ProcessingStage
    #[arg(long)]
    stage: Option<ProcessingStage>,

    /// Database server host name
    #[arg(long, env = "XNAT_PBS_JOBS_XNAT_SERVER")]
    xnat_server: String,

    /// Put servers, one is picked at random per unit
    #[arg(long, env = "XNAT_PBS_JOBS_PUT_SERVER_LIST", value_delimiter = ' ', num_args = 1..)]
    put_servers: Vec<String>,

    #[arg(long, env = "XNAT_PBS_JOBS_USER")]
    user: String,

    #[arg(long, env = "XNAT_PBS_JOBS_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, default_value = "qsub")]
    qsub: PathBuf,

    /// Program that deletes an archive resource, needed with CleanOutputFirst
    #[arg(long, env = "XNAT_PBS_JOBS_DELETE_RESOURCE")]
    delete_resource_program: Option<PathBuf>,

    /// Seconds to wait between units
    #[arg(long, default_value_t = 5)]
    stagger_seconds: u64,

    /// SQLite database recording submitted jobs
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Print the recorded submissions of the units and exit
    #[arg(long, requires = "ledger")]
    show_ledger: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    info!("starting up");

    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns false when any unit failed
fn run(args: Args) -> anyhow::Result<bool> {
    let units = match (&args.unit, &args.subjects) {
        (Some(unit), _) => vec![unit.clone()],
        (None, Some(path)) => read_unit_list(path).with_context(|| format!("reading subject list {}", path.display()))?,
        (None, None) => bail!("either --unit or --subjects is required"),
    };

    let ledger = match &args.ledger {
        Some(path) => Some(Ledger::open(path)?),
        None => None,
    };

    if args.show_ledger {
        if let Some(ledger) = &ledger {
            show_ledger(ledger, &units)?;
        }
        return Ok(true);
    }

    let settings = SettingsFile::load(&args.config).with_context(|| format!("reading settings {}", args.config.display()))?;
    let connection = Connection {
        username: args.user.clone(),
        password: args.password.clone(),
        server: format!("https://{}", args.xnat_server),
    };
    let put_servers: Vec<String> = args.put_servers.iter().filter(|s| !s.is_empty()).cloned().collect();
    if put_servers.is_empty() {
        bail!("XNAT_PBS_JOBS_PUT_SERVER_LIST is empty");
    }

    let scheduler = Qsub::new(&args.qsub);
    let gate = ProgramRunStatusGate::new(&args.env, args.pipeline.name());
    let deleter = ProgramResourceDeleter::new(args.delete_resource_program.as_deref());
    let services = Services { scheduler: &scheduler, gate: &gate, deleter: &deleter };

    let report = BatchDriver::new(&args.env, args.pipeline, &settings, &connection, &put_servers, services)
        .stage_override(args.stage)
        .stagger(Duration::from_secs(args.stagger_seconds))
        .ledger(ledger.as_ref())
        .run(&units);

    for (unit, outcome) in &report.outcomes {
        match outcome {
            UnitOutcome::Submitted(manifest) => info!("{unit}: submitted {}", manifest.labels().join(", ")),
            UnitOutcome::Skipped => info!("{unit}: skipped"),
            UnitOutcome::Failed(e) => eprintln!("FAILED {unit}: {e:#}"),
        }
    }
    if report.failures() > 0 {
        warn!("{} of {} units failed", report.failures(), report.outcomes.len());
    }
    Ok(report.failures() == 0)
}

fn show_ledger(ledger: &Ledger, units: &[WorkUnitIdentity]) -> anyhow::Result<()> {
    for unit in units {
        println!("-----");
        println!("{unit}");
        for record in ledger.submissions(unit)? {
            println!(
                "\t{} {} {}: {} ({})",
                record.submitted_at,
                record.pipeline,
                record.stage,
                record.job_ids.join(", "),
                record.working_dir
            );
        }
    }
    Ok(())
}
