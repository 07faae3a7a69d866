//! Loading step definitions from a JSON steps file.
//!
//! Two shapes are accepted: a bare array of steps, or an object with a
//! `config` section and a `steps` array. Specs are validated after parsing
//! so that bound errors surface at load time rather than mid-run.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{InvalidSpec, Step};

#[derive(Debug, Error)]
pub enum StepsFileError {
    #[error("failed to read steps file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse steps file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("step {id} ('{name}') has an empty name")]
    EmptyStepName { id: u64, name: String },
    #[error(transparent)]
    InvalidSpec(#[from] InvalidSpec),
}

/// Sequence-level settings carried by the steps file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub stop_at_step_fail: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            stop_at_step_fail: true,
        }
    }
}

/// Parsed steps file: ordered step list plus sequence-level config.
#[derive(Debug, Clone, PartialEq)]
pub struct StepsDefinition {
    pub steps: Vec<Step>,
    pub config: SequenceConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStepsFile {
    Table {
        #[serde(default)]
        config: SequenceConfig,
        #[serde(default)]
        steps: Vec<Step>,
    },
    List(Vec<Step>),
}

/// Load a steps definition from a file on disk.
pub fn steps_from_file(path: &Path) -> Result<StepsDefinition, StepsFileError> {
    let content = std::fs::read_to_string(path)?;
    steps_from_str(&content)
}

/// Parse a steps definition from JSON content.
pub fn steps_from_str(content: &str) -> Result<StepsDefinition, StepsFileError> {
    let raw: RawStepsFile = serde_json::from_str(content)?;
    let (steps, config) = match raw {
        RawStepsFile::Table { config, steps } => (steps, config),
        RawStepsFile::List(steps) => (steps, SequenceConfig::default()),
    };

    for step in &steps {
        if step.name.trim().is_empty() {
            return Err(StepsFileError::EmptyStepName {
                id: step.id,
                name: step.name.clone(),
            });
        }
        for spec in &step.specs {
            spec.validate()?;
        }
    }

    Ok(StepsDefinition { steps, config })
}
