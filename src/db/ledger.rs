use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection};

use crate::db::open::open_db;
use crate::environment::path_str;
use crate::orchestrator::SubmissionManifest;
use crate::unit::WorkUnitIdentity;
use crate::workspace::Workspace;

/// One manifest entry as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub pipeline: String,
    pub stage: String,
    pub job_ids: Vec<String>,
    pub working_dir: String,
    pub submitted_at: String,
}

pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    pub fn open(path: &Path) -> anyhow::Result<Ledger> {
        let conn = open_db(path).with_context(|| format!("opening submission ledger {}", path.display()))?;
        Ok(Ledger { conn })
    }

    #[cfg(test)]
    pub fn in_memory() -> anyhow::Result<Ledger> {
        let conn = Connection::open_in_memory()?;
        crate::db::open::create_schema(&conn)?;
        Ok(Ledger { conn })
    }

    /// Store every entry of a manifest, all or nothing
    pub fn record(&self, unit: &WorkUnitIdentity, pipeline: &str, workspace: &Workspace, manifest: &SubmissionManifest) -> anyhow::Result<()> {
        self.record_at(unit, pipeline, workspace, manifest, Utc::now())
    }

    fn record_at(&self, unit: &WorkUnitIdentity, pipeline: &str, workspace: &Workspace, manifest: &SubmissionManifest, at: DateTime<Utc>) -> anyhow::Result<()> {
        let submitted_at = at.to_rfc3339();
        let working_dir = path_str(&workspace.working_dir);
        let tx = self.conn.unchecked_transaction()?;
        for entry in manifest.entries() {
            let job_ids = serde_json::to_string(&entry.job_ids)?;
            tx.execute(
                "INSERT INTO submission (project, subject, classifier, scan, pipeline, stage, job_ids, working_dir, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![unit.project, unit.subject, unit.classifier, unit.scan, pipeline, entry.label, job_ids, working_dir, submitted_at],
            )?;
        }
        tx.commit()?;
        info!("Recorded {} submissions for {} in ledger", manifest.entries().len(), unit);
        Ok(())
    }

    /// Everything recorded for a unit, oldest first
    pub fn submissions(&self, unit: &WorkUnitIdentity) -> anyhow::Result<Vec<SubmissionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT pipeline, stage, job_ids, working_dir, submitted_at FROM submission
             WHERE project = ?1 AND subject = ?2 AND classifier = ?3 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![unit.project, unit.subject, unit.classifier], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (pipeline, stage, job_ids, working_dir, submitted_at) = row?;
            records.push(SubmissionRecord {
                pipeline,
                stage,
                job_ids: serde_json::from_str(&job_ids)?,
                working_dir,
                submitted_at,
            });
        }
        Ok(records)
    }
}
