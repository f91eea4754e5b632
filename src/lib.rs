//! Online anomaly detection over a stream of binary input vectors.
//!
//! Each tick runs three stages: the `ColumnPool` turns the input into a sparse set of active
//! columns, the `SequenceMemory` learns transitions between those sets and predicts the next one,
//! and the `AnomalyScorer` compares the active columns with the prediction made one tick earlier.
//! The `Pipeline` owns the three stages and threads the prediction from one tick to the next.
//!
//! ```no_run
//! use htm_anomaly::{Pipeline, PipelineConfig};
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::default())?;
//! pipeline.init()?;
//! let output = pipeline.compute(&vec![false; 10_000], true)?;
//! println!("raw anomaly: {}", output.raw);
//! # Ok::<(), htm_anomaly::HtmError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;

/// Strength of a synaptic connection, in [0, 1].
pub type Permanence = f32;

pub use crate::config::PipelineConfig;
pub use crate::core::pipeline::{Diagnostics, Pipeline, Prediction, TickOutput};
pub use crate::error::{HtmError, Result};
