//! Submit a batch of work units one after another
//!
//! Each unit is checked against its running status, gets its settings resolved and a put server
//! picked at random, then runs through its own orchestrator. A failing unit is reported and the
//! batch moves on to the next one.

use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::db::ledger::Ledger;
use crate::environment::Environment;
use crate::orchestrator::{Services, StagedOrchestrator, SubmissionManifest};
use crate::pipeline::PipelineKind;
use crate::settings::{Connection, PipelineOptions, SettingsFile, SubmissionConfig};
use crate::stage::ProcessingStage;
use crate::unit::WorkUnitIdentity;
use crate::workspace::system_clock;

/// What happened to one unit
#[derive(Debug)]
pub enum UnitOutcome {
    Submitted(SubmissionManifest),
    /// Jobs for the unit are already queued or running
    Skipped,
    Failed(anyhow::Error),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(WorkUnitIdentity, UnitOutcome)>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, UnitOutcome::Failed(_))).count()
    }

    pub fn submitted(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, UnitOutcome::Submitted(_))).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| matches!(o, UnitOutcome::Skipped)).count()
    }
}

pub struct BatchDriver<'a> {
    env: &'a Environment,
    pipeline: PipelineKind,
    settings: &'a SettingsFile,
    connection: &'a Connection,
    put_servers: &'a [String],
    services: Services<'a>,
    stage_override: Option<ProcessingStage>,
    stagger: Duration,
    ledger: Option<&'a Ledger>,
    clock: Rc<dyn Fn() -> i64>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(
        env: &'a Environment,
        pipeline: PipelineKind,
        settings: &'a SettingsFile,
        connection: &'a Connection,
        put_servers: &'a [String],
        services: Services<'a>,
    ) -> Self {
        BatchDriver {
            env,
            pipeline,
            settings,
            connection,
            put_servers,
            services,
            stage_override: None,
            stagger: Duration::ZERO,
            ledger: None,
            clock: Rc::from(system_clock()),
        }
    }

    pub fn stage_override(mut self, stage: Option<ProcessingStage>) -> Self {
        self.stage_override = stage;
        self
    }

    /// Pause between units so back-to-back workspaces get different timestamps
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn ledger(mut self, ledger: Option<&'a Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    #[cfg(test)]
    pub fn clock(mut self, clock: Rc<dyn Fn() -> i64>) -> Self {
        self.clock = clock;
        self
    }

    /// Submit every unit in order, never stopping early
    pub fn run(&self, units: &[WorkUnitIdentity]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut first = true;
        for listed in units {
            let (unit, outcome) = match self.prepare(listed) {
                Err(e) => (listed.clone(), UnitOutcome::Failed(e)),
                Ok((unit, resolved)) => match self.services.gate.is_queued_or_running(&unit) {
                    Err(e) => {
                        let e = anyhow::Error::new(e).context(format!("{unit}: cannot check running status"));
                        (unit, UnitOutcome::Failed(e))
                    }
                    Ok(true) => {
                        print_not_submitting(&unit);
                        (unit, UnitOutcome::Skipped)
                    }
                    Ok(false) => {
                        if !first && !self.stagger.is_zero() {
                            info!("Waiting {:?} before the next unit", self.stagger);
                            thread::sleep(self.stagger);
                        }
                        first = false;
                        let outcome = match self.submit(&unit, &resolved) {
                            Ok(manifest) => UnitOutcome::Submitted(manifest),
                            Err(e) => UnitOutcome::Failed(e),
                        };
                        (unit, outcome)
                    }
                },
            };
            if let UnitOutcome::Failed(e) = &outcome {
                error!("{}: {:#}", unit, e);
            }
            report.outcomes.push((unit, outcome));
        }
        info!(
            "Batch finished: {} submitted, {} skipped, {} failed",
            report.submitted(),
            report.skipped(),
            report.failures()
        );
        report
    }

    /// Resolve the unit's settings and pick its put server
    fn prepare(&self, listed: &WorkUnitIdentity) -> anyhow::Result<(WorkUnitIdentity, ResolvedUnit)> {
        let resolved = self
            .settings
            .resolve(&listed.subject, self.stage_override)
            .with_context(|| format!("{listed}: invalid settings"))?;
        let put_server = self
            .put_servers
            .choose(&mut thread_rng())
            .ok_or_else(|| anyhow!("no put servers configured"))?;
        let unit = listed.clone().with_scan(resolved.scan.clone());
        let config = resolved.submission_config(self.connection, put_server);
        Ok((unit, ResolvedUnit { config, options: resolved.options }))
    }

    fn submit(&self, unit: &WorkUnitIdentity, resolved: &ResolvedUnit) -> anyhow::Result<SubmissionManifest> {
        let config = &resolved.config;
        print_submitting(self.pipeline.name(), unit, config, resolved);

        let factory = self.pipeline.factory(resolved.options.clone());
        let clock = Rc::clone(&self.clock);
        let orchestrator = StagedOrchestrator::new(self.env, factory.as_ref(), self.services, unit.clone(), Box::new(move || clock()));
        let workspace = orchestrator.workspace().clone();
        let manifest = orchestrator.submit_jobs(config)?;

        println!("\tsubmitted jobs:");
        print!("{}", indent(&manifest.to_string()));
        println!("-----");

        if let Some(ledger) = self.ledger {
            // jobs are already queued, only the record is lost
            if let Err(e) = ledger.record(unit, self.pipeline.name(), &workspace, &manifest) {
                warn!("Cannot record submissions for {} in ledger: {:#}", unit, e);
            }
        }
        Ok(manifest)
    }
}

struct ResolvedUnit {
    config: SubmissionConfig,
    options: PipelineOptions,
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("\t  {line}\n")).collect()
}

fn print_not_submitting(unit: &WorkUnitIdentity) {
    println!("-----");
    println!("\tNOT SUBMITTING JOBS FOR");
    println!("\t               project: {}", unit.project);
    println!("\t               subject: {}", unit.subject);
    println!("\t    session classifier: {}", unit.classifier);
    println!("\tJOBS ARE ALREADY QUEUED OR RUNNING");
}

fn print_submitting(pipeline: &str, unit: &WorkUnitIdentity, config: &SubmissionConfig, resolved: &ResolvedUnit) {
    println!("-----");
    println!("\tSubmitting {} jobs for:", pipeline);
    println!("\t               project: {}", unit.project);
    println!("\t               subject: {}", unit.subject);
    println!("\t    session classifier: {}", unit.classifier);
    if let Some(scan) = &unit.scan {
        println!("\t                  scan: {}", scan);
    }
    println!("\t            put_server: {}", config.put_server);
    println!("\t    clean_output_first: {}", config.clean_output_first);
    println!("\t      processing_stage: {}", config.processing_stage);
    println!("\t    walltime_limit_hrs: {}", config.walltime_hours);
    println!("\t         mem_limit_gbs: {}", config.mem_gbs);
    println!("\toutput_resource_suffix: {}", config.output_resource_suffix);
    if let Some(brain_size) = resolved.options.brain_size {
        println!("\t            brain_size: {}", brain_size);
    }
    println!("\tuse_prescan_normalized: {}", resolved.options.use_prescan_normalized);
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Instant;

    use tempfile::TempDir;

    use super::*;
    use crate::orchestrator::MARK_COMPLETE_LABEL;
    use crate::testing::{self, RecordingDeleter, RecordingGate, RecordingScheduler};

    const SETTINGS: &str = r#"{
        "Defaults": {
            "CleanOutputFirst": false,
            "ProcessingStage": "CHECK_DATA",
            "WalltimeLimitHours": 36,
            "MemLimitGbs": 16,
            "OutputResourceSuffix": "Structural_preproc"
        },
        "Subjects": {
            "100408": { "ProcessingStage": "GET_DATA" },
            "bad": { "ProcessingStage": "NOT_A_STAGE" }
        }
    }"#;

    struct Batch {
        _root: TempDir,
        env: Environment,
        settings: SettingsFile,
        connection: Connection,
        put_servers: Vec<String>,
        scheduler: RecordingScheduler,
        gate: RecordingGate,
        deleter: RecordingDeleter,
    }

    impl Batch {
        fn new(gate: RecordingGate) -> Self {
            let root = TempDir::new().expect("temp dir");
            Batch {
                env: testing::environment(root.path()),
                _root: root,
                settings: serde_json::from_str(SETTINGS).unwrap(),
                connection: Connection {
                    username: "tester".to_string(),
                    password: "secret".to_string(),
                    server: "https://db.example.org".to_string(),
                },
                put_servers: vec!["https://put1.example.org".to_string(), "https://put2.example.org".to_string()],
                scheduler: RecordingScheduler::default(),
                gate,
                deleter: RecordingDeleter::default(),
            }
        }

        fn driver(&self) -> BatchDriver<'_> {
            let services = Services { scheduler: &self.scheduler, gate: &self.gate, deleter: &self.deleter };
            // a fresh second per unit, so units of one subject never collide
            let tick = Rc::new(Cell::new(1700000000_i64));
            BatchDriver::new(&self.env, PipelineKind::StructuralPreprocessing, &self.settings, &self.connection, &self.put_servers, services)
                .clock(Rc::new(move || {
                    tick.set(tick.get() + 1);
                    tick.get()
                }))
        }
    }

    fn unit(subject: &str) -> WorkUnitIdentity {
        WorkUnitIdentity::new("HCP_1200", subject, "3T")
    }

    #[test]
    fn busy_units_are_skipped_and_others_submitted() {
        let batch = Batch::new(RecordingGate { busy_subjects: vec!["100307".to_string()], ..Default::default() });
        let report = batch.driver().run(&[unit("100307"), unit("100408")]);

        assert_eq!((report.submitted(), report.skipped(), report.failures()), (1, 1, 0));
        assert!(matches!(report.outcomes[0].1, UnitOutcome::Skipped));
        match &report.outcomes[1].1 {
            UnitOutcome::Submitted(manifest) => assert_eq!(manifest.labels(), vec!["GET_DATA", MARK_COMPLETE_LABEL]),
            other => panic!("expected submission, got {other:?}"),
        }
        assert_eq!(batch.gate.checked.borrow().len(), 2);
        assert_eq!(batch.scheduler.submitted.borrow().len(), 2);
    }

    #[test]
    fn failing_unit_does_not_stop_the_batch() {
        let batch = Batch::new(RecordingGate::default());
        let report = batch.driver().run(&[unit("bad"), unit("100307")]);

        match &report.outcomes[0].1 {
            UnitOutcome::Failed(e) => assert!(format!("{e:#}").contains("NOT_A_STAGE"), "{e:#}"),
            other => panic!("expected failure, got {other:?}"),
        }
        match &report.outcomes[1].1 {
            UnitOutcome::Submitted(manifest) => assert_eq!(manifest.entries().len(), 6),
            other => panic!("expected submission, got {other:?}"),
        }
        assert_eq!(report.failures(), 1);
    }

    #[test]
    fn scheduler_failure_is_attributed_to_the_unit() {
        let mut batch = Batch::new(RecordingGate::default());
        batch.scheduler = RecordingScheduler::rejecting(".CLEAN_DATA_job.sh");
        let report = batch.driver().run(&[unit("100307"), unit("100408")]);

        match &report.outcomes[0].1 {
            UnitOutcome::Failed(e) => {
                let message = e.to_string();
                assert!(message.contains("HCP_1200:100307:3T"), "{message}");
                assert!(message.contains("CLEAN_DATA"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(matches!(report.outcomes[1].1, UnitOutcome::Submitted(_)));
    }

    #[test]
    fn stage_override_applies_to_every_unit() {
        let batch = Batch::new(RecordingGate::default());
        let report = batch.driver().stage_override(Some(ProcessingStage::PrepareScripts)).run(&[unit("100307"), unit("bad")]);
        assert_eq!(report.submitted(), 2);
        assert!(batch.gate.marked.borrow().is_empty());
    }

    #[test]
    fn unknown_running_status_fails_the_unit() {
        let batch = Batch::new(RecordingGate { fail_check: true, ..Default::default() });
        let report = batch.driver().run(&[unit("100307")]);
        match &report.outcomes[0].1 {
            UnitOutcome::Failed(e) => assert!(e.to_string().contains("cannot check running status"), "{e}"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(batch.scheduler.submitted.borrow().is_empty());
    }

    #[test]
    fn stagger_sleeps_between_submitted_units_only() {
        let batch = Batch::new(RecordingGate { busy_subjects: vec!["100307".to_string()], ..Default::default() });
        let started = Instant::now();
        let report = batch.driver().stagger(Duration::from_secs(30)).run(&[unit("100307"), unit("100408")]);
        assert_eq!((report.skipped(), report.submitted()), (1, 1));
        assert!(started.elapsed() < Duration::from_secs(10), "slept before the only submitted unit");

        let batch = Batch::new(RecordingGate::default());
        let started = Instant::now();
        let report = batch.driver().stagger(Duration::from_millis(50)).run(&[unit("100307"), unit("100408")]);
        assert_eq!(report.submitted(), 2);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn put_server_comes_from_the_pool() {
        let batch = Batch::new(RecordingGate::default());
        let driver = batch.driver();
        for _ in 0..10 {
            let (_, resolved) = driver.prepare(&unit("100307")).unwrap();
            assert!(batch.put_servers.contains(&resolved.config.put_server));
        }
    }

    #[test]
    fn empty_put_server_pool_fails_the_unit() {
        let mut batch = Batch::new(RecordingGate::default());
        batch.put_servers.clear();
        let report = batch.driver().run(&[unit("100307")]);
        assert_eq!(report.failures(), 1);
        assert!(batch.scheduler.submitted.borrow().is_empty());
    }

    #[test]
    fn submissions_are_recorded_in_the_ledger() {
        let batch = Batch::new(RecordingGate::default());
        let ledger = Ledger::in_memory().unwrap();
        batch.driver().ledger(Some(&ledger)).run(&[unit("100408")]);

        let records = ledger.submissions(&unit("100408")).unwrap();
        let stages: Vec<&str> = records.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(stages, vec!["GET_DATA", MARK_COMPLETE_LABEL]);
        assert!(records.iter().all(|r| r.pipeline == "StructuralPreprocessing"));
    }
}
