//! Pipeline configuration.
//!
//! Every field has a default, so a JSON file only needs to name the values it changes:
//!
//! ```json
//! { "column_dimensions": [1024], "anomaly": { "mode": "pure" } }
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::core::{
    anomaly::AnomalyParams, column_pool::ColumnPoolParams,
    sequence_memory::SequenceMemoryParams,
};
use crate::error::{HtmError, Result};

/// Configuration fixed when a `Pipeline` is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input_dimensions: Vec<usize>,
    pub column_dimensions: Vec<usize>,
    pub cells_per_column: usize,
    /// Seeds potential pool sampling and initial permanences.
    pub seed: u64,
    /// Whether each `TickOutput` carries the active cells and other per-tick detail.
    pub diagnostics: bool,
    pub column_pool: ColumnPoolParams,
    pub sequence_memory: SequenceMemoryParams,
    pub anomaly: AnomalyParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dimensions: vec![10_000],
            column_dimensions: vec![2048],
            cells_per_column: 10,
            seed: 42,
            diagnostics: false,
            column_pool: ColumnPoolParams::default(),
            sequence_memory: SequenceMemoryParams::default(),
            anomaly: AnomalyParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses a configuration from JSON text. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Number of input bits.
    pub fn num_inputs(&self) -> usize {
        self.input_dimensions.iter().product()
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.column_dimensions.iter().product()
    }

    /// Checks every value before any component is built.
    pub fn validate(&self) -> Result<()> {
        check_dimensions("input_dimensions", &self.input_dimensions)?;
        check_dimensions("column_dimensions", &self.column_dimensions)?;
        if self.input_dimensions.len() != self.column_dimensions.len() {
            return Err(HtmError::invalid(
                "column_dimensions",
                format!(
                    "has {} dimensions but input_dimensions has {}",
                    self.column_dimensions.len(),
                    self.input_dimensions.len()
                ),
            ));
        }
        if self.cells_per_column == 0 {
            return Err(HtmError::invalid("cells_per_column", "must be at least 1"));
        }

        self.column_pool.validate()?;
        self.sequence_memory.validate()?;
        self.anomaly.validate()
    }
}

fn check_dimensions(name: &'static str, dims: &[usize]) -> Result<()> {
    if dims.is_empty() {
        return Err(HtmError::invalid(name, "must have at least one dimension"));
    }
    if dims.contains(&0) {
        return Err(HtmError::invalid(name, format!("{dims:?} contains a zero dimension")));
    }
    Ok(())
}
