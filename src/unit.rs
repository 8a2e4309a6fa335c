//! Work units: one subject session (plus optional scan) to be processed

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::info;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnitIdentity {
    pub project: String,
    pub subject: String,
    pub classifier: String,
    pub scan: Option<String>,
    pub extra: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid work unit '{0}', expected project:subject:classifier[:extra]")]
pub struct UnitParseError(pub String);

impl WorkUnitIdentity {
    pub fn new(project: &str, subject: &str, classifier: &str) -> Self {
        WorkUnitIdentity {
            project: project.to_string(),
            subject: subject.to_string(),
            classifier: classifier.to_string(),
            scan: None,
            extra: None,
        }
    }

    pub fn with_scan(mut self, scan: Option<String>) -> Self {
        self.scan = scan.filter(|s| !s.is_empty());
        self
    }

    pub fn session(&self) -> String {
        format!("{}_{}", self.subject, self.classifier)
    }

    /// `subject_classifier[_scan]`, the stem shared by script names and the workspace suffix
    pub fn stem(&self) -> String {
        match &self.scan {
            Some(scan) => format!("{}_{}_{}", self.subject, self.classifier, scan),
            None => self.session(),
        }
    }
}

impl fmt::Display for WorkUnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.subject, self.classifier)?;
        if let Some(extra) = &self.extra {
            write!(f, ":{extra}")?;
        }
        if let Some(scan) = &self.scan {
            write!(f, " (scan {scan})")?;
        }
        Ok(())
    }
}

impl FromStr for WorkUnitIdentity {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        let (project, subject, classifier, extra) = match fields.as_slice() {
            [p, s, c] => (*p, *s, *c, None),
            [p, s, c, e] => (*p, *s, *c, Some(*e)),
            _ => return Err(UnitParseError(s.to_string())),
        };
        if project.is_empty() || subject.is_empty() || classifier.is_empty() {
            return Err(UnitParseError(s.to_string()));
        }

        let mut unit = WorkUnitIdentity::new(project, subject, classifier);
        unit.extra = extra.filter(|e| !e.is_empty()).map(str::to_string);
        Ok(unit)
    }
}

/// Read a subject list file, one `project:subject:classifier[:extra]` per line
pub fn read_unit_list(path: &Path) -> anyhow::Result<Vec<WorkUnitIdentity>> {
    info!("Retrieving subject list from {}", path.display());
    let text = fs::read_to_string(path)?;
    let units = parse_unit_list(&text)?;
    info!("Loaded {} work units", units.len());
    Ok(units)
}

fn parse_unit_list(text: &str) -> Result<Vec<WorkUnitIdentity>, UnitParseError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}
