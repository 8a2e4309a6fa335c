use std::fmt;
use clap::ValueEnum;

use crate::script::factory::ScriptFactory;
use crate::script::structural::{StructuralPreprocessing, PIPELINE_NAME as STRUCTURAL};
use crate::settings::PipelineOptions;

/// Pipelines this tool can submit
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PipelineKind {
    StructuralPreprocessing,
}

impl PipelineKind {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineKind::StructuralPreprocessing => STRUCTURAL,
        }
    }

    pub fn factory(&self, options: PipelineOptions) -> Box<dyn ScriptFactory> {
        match self {
            PipelineKind::StructuralPreprocessing => Box::new(StructuralPreprocessing::new(options)),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
