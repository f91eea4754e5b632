//! The `Pipeline` drives one tick at a time through the three stages:
//!
//! input -> `ColumnPool` -> active columns -> `SequenceMemory` -> prediction for the next tick
//!                                         \-> `AnomalyScorer` (against the prediction from the previous tick)
//!
//! A pipeline is created with `new(config)` and becomes usable after `init()`, which builds the
//! stages from the seeded random generator. Before that every tick fails with `NotInitialized`.
//!
//! The carried prediction is a `Prediction` value stamped with the tick it is meant for.
//! `step` takes it explicitly and returns the next one, so recorded (state, input, prediction)
//! triples can be replayed. `compute` threads the pipeline's own copy. A prediction offered
//! for any other tick is rejected with `StalePrediction` before any state changes, which keeps
//! the scorer from ever comparing activity against a prediction made for a different tick.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use super::{
    anomaly::AnomalyScorer,
    column::{ColumnActivation, ColumnSet, PredictedColumns},
    column_pool::ColumnPool,
    sequence_memory::{CellIdx, SequenceMemory},
};
use crate::config::PipelineConfig;
use crate::error::{HtmError, Result};

/// The columns predicted for one specific tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    for_tick: u64,
    columns: PredictedColumns,
}

impl Prediction {
    /// The empty prediction the first tick is scored against.
    pub fn initial() -> Self {
        Self {
            for_tick: 1,
            columns: ColumnSet::new(),
        }
    }

    /// The tick this prediction is meant for.
    pub fn for_tick(&self) -> u64 {
        self.for_tick
    }

    pub fn columns(&self) -> &PredictedColumns {
        &self.columns
    }
}

/// Per-tick detail, produced when `PipelineConfig::diagnostics` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub active_cells: Vec<CellIdx>,
    pub winner_cells: Vec<CellIdx>,
    pub predictive_cells: Vec<CellIdx>,
    pub bursting_columns: ColumnSet,
    /// Columns predicted for the next tick.
    pub predicted_columns: PredictedColumns,
}

/// The result of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickOutput {
    /// Ticks are numbered from 1.
    pub tick: u64,
    /// Fraction of active columns that were not predicted.
    pub raw: f32,
    /// Anomaly likelihood; `None` in pure mode.
    pub likelihood: Option<f32>,
    /// The mode-selected score after smoothing.
    pub score: f32,
    pub active_columns: ColumnActivation,
    pub diagnostics: Option<Diagnostics>,
}

/// Everything that exists once the pipeline is initialized.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Components {
    pub(crate) pool: ColumnPool,
    pub(crate) memory: SequenceMemory,
    pub(crate) scorer: AnomalyScorer,
    /// Ticks completed so far.
    pub(crate) tick: u64,
    pub(crate) prediction: Prediction,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Uninitialized,
    Ready(Box<Components>),
}

/// Column pool, sequence memory and anomaly scorer, run in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    config: PipelineConfig,
    stage: Stage,
}

impl Pipeline {
    /// Validates the configuration. The pipeline is not usable until `init()`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stage: Stage::Uninitialized,
        })
    }

    /// Builds all stages from a generator seeded with `config.seed`.
    pub fn init(&mut self) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.init_with_rng(&mut rng)
    }

    /// Builds all stages drawing randomness from `rng`.
    pub fn init_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        if self.is_ready() {
            return Err(HtmError::AlreadyInitialized);
        }

        let config = &self.config;
        let pool = ColumnPool::new(
            &config.input_dimensions,
            &config.column_dimensions,
            config.column_pool.clone(),
            rng,
        )?;
        let memory = SequenceMemory::new(
            pool.num_columns(),
            config.cells_per_column,
            config.sequence_memory.clone(),
        )?;
        let scorer = AnomalyScorer::new(config.anomaly.clone())?;

        info!(
            inputs = pool.num_inputs(),
            columns = pool.num_columns(),
            cells_per_column = config.cells_per_column,
            mode = ?config.anomaly.mode,
            "pipeline initialized"
        );

        self.stage = Stage::Ready(Box::new(Components {
            pool,
            memory,
            scorer,
            tick: 0,
            prediction: Prediction::initial(),
        }));
        Ok(())
    }

    /// Runs one tick against the pipeline's own carried prediction.
    pub fn compute(&mut self, input: &[bool], learn: bool) -> Result<TickOutput> {
        let prediction = self.ready()?.prediction.clone();
        self.step(input, &prediction, learn).map(|(output, _)| output)
    }

    /// Runs one tick against an explicit prediction and returns the prediction for the next tick.
    ///
    /// The returned prediction also becomes the pipeline's carried prediction.
    /// Fails without touching any state if the pipeline is not initialized, `input` has the
    /// wrong length, or `prediction` is not meant for this tick.
    pub fn step(
        &mut self,
        input: &[bool],
        prediction: &Prediction,
        learn: bool,
    ) -> Result<(TickOutput, Prediction)> {
        let diagnostics = self.config.diagnostics;
        let parts = self.ready_mut()?;

        let tick = parts.tick + 1;
        if prediction.for_tick != tick {
            return Err(HtmError::StalePrediction {
                expected: tick,
                found: prediction.for_tick,
            });
        }
        if input.len() != parts.pool.num_inputs() {
            return Err(HtmError::InputLength {
                expected: parts.pool.num_inputs(),
                got: input.len(),
            });
        }

        let active = parts.pool.compute(input, learn)?;
        let step = parts.memory.step(&active, &prediction.columns, learn)?;
        let score = parts.scorer.score(&active, &prediction.columns);

        let next = Prediction {
            for_tick: tick + 1,
            columns: step.predicted_columns,
        };
        parts.tick = tick;
        parts.prediction = next.clone();

        trace!(
            tick,
            active = active.len(),
            predicted = next.columns.len(),
            raw = score.raw,
            score = score.score,
            "tick"
        );

        let diagnostics = diagnostics.then(|| Diagnostics {
            active_cells: step.active_cells.active,
            winner_cells: step.active_cells.winners,
            predictive_cells: step.predictive_cells,
            bursting_columns: step.bursting_columns,
            predicted_columns: next.columns.clone(),
        });

        let output = TickOutput {
            tick,
            raw: score.raw,
            likelihood: score.likelihood,
            score: score.score,
            active_columns: active,
            diagnostics,
        };

        Ok((output, next))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.stage, Stage::Ready(_))
    }

    /// Ticks completed so far; zero before `init()`.
    pub fn tick(&self) -> u64 {
        self.ready().map(|parts| parts.tick).unwrap_or(0)
    }

    /// The prediction the next tick will be scored against.
    pub fn prediction(&self) -> Option<&Prediction> {
        self.ready().ok().map(|parts| &parts.prediction)
    }

    pub fn column_pool(&self) -> Option<&ColumnPool> {
        self.ready().ok().map(|parts| &parts.pool)
    }

    pub fn sequence_memory(&self) -> Option<&SequenceMemory> {
        self.ready().ok().map(|parts| &parts.memory)
    }

    pub fn anomaly_scorer(&self) -> Option<&AnomalyScorer> {
        self.ready().ok().map(|parts| &parts.scorer)
    }

    pub(crate) fn ready(&self) -> Result<&Components> {
        match &self.stage {
            Stage::Ready(parts) => Ok(&**parts),
            Stage::Uninitialized => Err(HtmError::NotInitialized),
        }
    }

    fn ready_mut(&mut self) -> Result<&mut Components> {
        match &mut self.stage {
            Stage::Ready(parts) => Ok(&mut **parts),
            Stage::Uninitialized => Err(HtmError::NotInitialized),
        }
    }

    /// Reassembles an initialized pipeline from checkpointed parts.
    pub(crate) fn from_components(config: PipelineConfig, components: Components) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stage: Stage::Ready(Box::new(components)),
        })
    }
}
