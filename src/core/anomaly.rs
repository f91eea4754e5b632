//! Anomaly scoring.
//!
//! The raw anomaly score is the fraction of active columns that were not predicted one step earlier.
//! The anomaly likelihood calibrates that score against its own recent history: a Gaussian is fitted
//! to the trailing window of raw scores, and the likelihood is the probability mass of that Gaussian
//! below the current score (one minus the upper-tail probability of a score at least this large).
//! A likelihood close to 1 means the current score is unusually high for this stream.
//!
//! Until `warm_up` scores have been seen the likelihood is the neutral value 0.5.
//! This is a defined startup behavior, not an error.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::column::{ColumnActivation, PredictedColumns};
use crate::error::{HtmError, Result};

/// Likelihood reported before warm-up completes.
pub const NEUTRAL_LIKELIHOOD: f32 = 0.5;

/// Which value the combined `AnomalyScore::score` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMode {
    /// The raw score. No likelihood is computed.
    Pure,
    /// The anomaly likelihood.
    #[default]
    Likelihood,
    /// The raw score multiplied by the likelihood.
    Weighted,
}

/// Parameters for an `AnomalyScorer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    pub mode: AnomalyMode,
    /// Number of raw scores needed before the likelihood is estimated.
    pub warm_up: usize,
    /// Number of trailing raw scores the Gaussian is fitted to.
    pub statistics_window: usize,
    /// The combined score is averaged over this many ticks. 1 disables smoothing.
    pub moving_average_window: usize,
    /// Lower bound on the fitted standard deviation.
    pub min_std_dev: f64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            mode: AnomalyMode::Likelihood,
            warm_up: 288,
            statistics_window: 8640,
            moving_average_window: 5,
            min_std_dev: 0.01,
        }
    }
}

impl AnomalyParams {
    /// Checks that every parameter is within its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.statistics_window == 0 {
            return Err(HtmError::invalid("anomaly.statistics_window", "must be at least 1"));
        }
        if self.warm_up > self.statistics_window {
            return Err(HtmError::invalid(
                "anomaly.warm_up",
                format!(
                    "{} exceeds the statistics window ({})",
                    self.warm_up, self.statistics_window
                ),
            ));
        }
        if self.moving_average_window == 0 {
            return Err(HtmError::invalid(
                "anomaly.moving_average_window",
                "must be at least 1",
            ));
        }
        if !(self.min_std_dev.is_finite() && self.min_std_dev > 0.0) {
            return Err(HtmError::invalid(
                "anomaly.min_std_dev",
                "must be finite and positive",
            ));
        }
        Ok(())
    }
}

/// The scores for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    /// Fraction of active columns that were not predicted, in [0, 1].
    pub raw: f32,
    /// Anomaly likelihood in [0, 1]; `None` in `Pure` mode.
    pub likelihood: Option<f32>,
    /// The mode-selected value, averaged over the moving-average window.
    pub score: f32,
}

/// Fraction of `active` columns missing from `predicted`. Zero when nothing is active.
pub fn raw_anomaly_score(active: &ColumnActivation, predicted: &PredictedColumns) -> f32 {
    if active.is_empty() {
        return 0.0;
    }

    let predicted_active = active.overlap(predicted);
    1.0 - predicted_active as f32 / active.len() as f32
}

/// Rolling history of anomaly scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyHistory {
    /// Latest combined scores, for the moving average.
    recent: VecDeque<f32>,
    /// Trailing raw scores the likelihood is estimated from.
    historical: VecDeque<f32>,
    sum: f64,
    sum_sq: f64,
    /// Raw scores seen since initialization.
    total: u64,
}

impl AnomalyHistory {
    fn new(params: &AnomalyParams) -> Self {
        Self {
            recent: VecDeque::with_capacity(params.moving_average_window),
            historical: VecDeque::with_capacity(params.statistics_window.min(1 << 16)),
            sum: 0.0,
            sum_sq: 0.0,
            total: 0,
        }
    }

    /// Appends a raw score, dropping the oldest once `window` is full.
    fn push_raw(&mut self, raw: f32, window: usize) {
        if self.historical.len() >= window {
            if let Some(removed) = self.historical.pop_front() {
                self.sum -= removed as f64;
                self.sum_sq -= (removed as f64) * (removed as f64);
            }
        }

        self.historical.push_back(raw);
        self.sum += raw as f64;
        self.sum_sq += (raw as f64) * (raw as f64);
        self.total += 1;
    }

    /// Appends a combined score and returns the mean over the moving-average window.
    fn push_recent(&mut self, score: f32, window: usize) -> f32 {
        if self.recent.len() >= window {
            self.recent.pop_front();
        }
        self.recent.push_back(score);
        self.recent.iter().sum::<f32>() / self.recent.len() as f32
    }

    /// Number of raw scores currently in the statistics window.
    pub fn len(&self) -> usize {
        self.historical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.historical.is_empty()
    }

    /// Raw scores seen since initialization.
    pub fn total_samples(&self) -> u64 {
        self.total
    }

    /// Mean of the raw scores in the statistics window.
    pub fn mean(&self) -> f64 {
        if self.historical.is_empty() {
            return 0.0;
        }
        self.sum / self.historical.len() as f64
    }

    /// Population standard deviation of the raw scores in the statistics window.
    pub fn std_dev(&self) -> f64 {
        if self.historical.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.historical.len() as f64 - mean * mean)
            .max(0.0)
            .sqrt()
    }
}

/// Turns active and previously predicted columns into raw scores and likelihoods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScorer {
    params: AnomalyParams,
    history: AnomalyHistory,
}

impl AnomalyScorer {
    pub fn new(params: AnomalyParams) -> Result<Self> {
        params.validate()?;
        let history = AnomalyHistory::new(&params);
        Ok(Self { params, history })
    }

    /// Scores this tick's active columns against the columns predicted one tick earlier,
    /// then appends the raw score to the history.
    ///
    /// The likelihood is estimated from the history including this score.
    pub fn score(
        &mut self,
        active: &ColumnActivation,
        predicted: &PredictedColumns,
    ) -> AnomalyScore {
        let raw = raw_anomaly_score(active, predicted);
        self.record(raw)
    }

    /// Appends an already computed raw score and returns the resulting scores.
    pub fn record(&mut self, raw: f32) -> AnomalyScore {
        self.history.push_raw(raw, self.params.statistics_window);

        let likelihood = match self.params.mode {
            AnomalyMode::Pure => None,
            AnomalyMode::Likelihood | AnomalyMode::Weighted => Some(self.likelihood_of(raw)),
        };

        let combined = match (self.params.mode, likelihood) {
            (AnomalyMode::Likelihood, Some(likelihood)) => likelihood,
            (AnomalyMode::Weighted, Some(likelihood)) => raw * likelihood,
            _ => raw,
        };

        let score = self
            .history
            .push_recent(combined, self.params.moving_average_window);

        AnomalyScore {
            raw,
            likelihood,
            score,
        }
    }

    /// The likelihood a raw score would get against the current history, without recording it.
    pub fn likelihood_of(&self, raw: f32) -> f32 {
        if self.history.len() < self.params.warm_up || self.history.is_empty() {
            return NEUTRAL_LIKELIHOOD;
        }

        let mean = self.history.mean();
        let std_dev = self.history.std_dev().max(self.params.min_std_dev);
        let z = (raw as f64 - mean) / std_dev;
        // Mirrored around the mean so that the result stays monotone in `raw`.
        let likelihood = if z >= 0.0 {
            1.0 - upper_tail(z)
        } else {
            upper_tail(-z)
        };

        (likelihood as f32).clamp(0.0, 1.0)
    }

    /// Whether enough scores have been seen for the likelihood to be estimated.
    pub fn is_warmed_up(&self) -> bool {
        self.history.len() >= self.params.warm_up && !self.history.is_empty()
    }

    pub fn params(&self) -> &AnomalyParams {
        &self.params
    }

    pub fn history(&self) -> &AnomalyHistory {
        &self.history
    }
}

/// Probability that a standard normal variable exceeds `z`, for `z >= 0`.
fn upper_tail(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2).min(1.0)
}

/// Complementary error function (Numerical Recipes `erfcc`, fractional error below 1.2e-7).
fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.5 * x.abs());

    let tau = t
        * (-x * x - 1.26551223
            + t * (1.00002368
                + t * (0.37409196
                    + t * (0.09678418
                        + t * (-0.18628806
                            + t * (0.27886807
                                + t * (-1.13520398
                                    + t * (1.48851587
                                        + t * (-0.82215223 + t * 0.17087277)))))))))
            .exp();

    if x >= 0.0 {
        tau
    } else {
        2.0 - tau
    }
}
