//! Find field map files in a session's first T1w resource directory

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

const SPIN_ECHO_MARK: &str = "SpinEchoFieldMap";
const MAGNITUDE_MARK: &str = "FieldMap_Magnitude";
const PHASE_MARK: &str = "FieldMap_Phase";
const NIFTI_SUFFIX: &str = ".nii.gz";

/// Phase encoding direction suffixes of the spin echo pair
const POSITIVE_DIR: &str = "PA";
const NEGATIVE_DIR: &str = "AP";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("session has no T1w resource at {}", .dir.display())]
    NoResource { dir: PathBuf },
    #[error("first T1w resource has no {artifact} (*{pattern}) in {}", .dir.display())]
    Missing { artifact: &'static str, pattern: String, dir: PathBuf },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldMapKind {
    SpinEcho,
    SiemensGradientEcho,
    None,
}

impl fmt::Display for FieldMapKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldMapKind::SpinEcho => write!(f, "SE"),
            FieldMapKind::SiemensGradientEcho => write!(f, "GE"),
            FieldMapKind::None => write!(f, "NONE"),
        }
    }
}

/// Field map files found for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMaps {
    SpinEcho { positive: PathBuf, negative: PathBuf },
    SiemensGradientEcho { magnitude: PathBuf, phase: PathBuf },
    None,
}

impl FieldMaps {
    pub fn kind(&self) -> FieldMapKind {
        match self {
            FieldMaps::SpinEcho { .. } => FieldMapKind::SpinEcho,
            FieldMaps::SiemensGradientEcho { .. } => FieldMapKind::SiemensGradientEcho,
            FieldMaps::None => FieldMapKind::None,
        }
    }

    pub fn files(&self) -> Vec<&Path> {
        match self {
            FieldMaps::SpinEcho { positive, negative } => vec![positive, negative],
            FieldMaps::SiemensGradientEcho { magnitude, phase } => vec![magnitude, phase],
            FieldMaps::None => Vec::new(),
        }
    }
}

/// Classify and locate the field maps in a T1w resource directory
///
/// Spin echo maps take precedence. A gradient echo set needs both a magnitude and a phase image.
/// Once a kind is detected each of its files must be present, otherwise the missing one is
/// reported by name.
pub fn discover(dir: &Path) -> Result<FieldMaps, DiscoveryError> {
    let names = nifti_names(dir)?;
    debug!("{} NIfTI files in {}", names.len(), dir.display());

    let found = if names.iter().any(|n| n.contains(SPIN_ECHO_MARK)) {
        FieldMaps::SpinEcho {
            positive: find(dir, &names, SPIN_ECHO_MARK, POSITIVE_DIR, "positive spin echo field map")?,
            negative: find(dir, &names, SPIN_ECHO_MARK, NEGATIVE_DIR, "negative spin echo field map")?,
        }
    } else if names.iter().filter(|n| n.contains(MAGNITUDE_MARK) || n.contains(PHASE_MARK)).count() > 1 {
        FieldMaps::SiemensGradientEcho {
            magnitude: find(dir, &names, MAGNITUDE_MARK, "", "magnitude field map")?,
            phase: find(dir, &names, PHASE_MARK, "", "phase field map")?,
        }
    } else {
        FieldMaps::None
    };

    info!("Field maps in {}: {}", dir.display(), found.kind());
    for file in found.files() {
        debug!("  {}", file.display());
    }
    Ok(found)
}

fn nifti_names(dir: &Path) -> Result<Vec<String>, DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|_| DiscoveryError::NoResource { dir: dir.to_path_buf() })?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(NIFTI_SUFFIX))
        .collect();
    // read_dir order is unspecified, first match must be stable
    names.sort();
    Ok(names)
}

/// First file matching `*<mark>*<direction>.nii.gz`
fn find(dir: &Path, names: &[String], mark: &str, direction: &str, artifact: &'static str) -> Result<PathBuf, DiscoveryError> {
    let tail = format!("{direction}{NIFTI_SUFFIX}");
    names
        .iter()
        .find(|name| {
            name.find(mark)
                .is_some_and(|at| name[at + mark.len()..].ends_with(&tail))
        })
        .map(|name| dir.join(name))
        .ok_or_else(|| DiscoveryError::Missing {
            artifact,
            pattern: format!("{mark}*{tail}"),
            dir: dir.to_path_buf(),
        })
}
