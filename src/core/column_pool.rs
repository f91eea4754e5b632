//! The `ColumnPool` is the spatial pooling stage of the pipeline. It:
//! - Initializes a fixed set of columns, each with potential synapses into its own subset of the input space.
//! - Computes an "overlap" score for each column: connected synapses onto active input bits, times the column's boost.
//! - Enforces sparse activity via inhibition, allowing only the top columns (globally or per neighborhood) to win.
//! - Learns by raising permanences of winners onto active bits and lowering them onto inactive bits.
//!
//! What are duty cycles?
//! - They are rolling metrics that measure how often each column is meeting certain criteria over time.
//! - The pool tracks overlap duty cycles (how often a column has any overlap with the input)
//!   and active duty cycles (how often a column wins inhibition).
//! - Active duty cycles drive boosting: a column that wins less often than its neighborhood
//!   gets its overlap multiplied by a boost factor greater than one.
//! - Overlap duty cycles catch columns whose synapses never see input; their permanences get bumped up.
//!
//! Columns whose active duty cycle has not yet risen above a threshold are "unlearned".
//! They still take part in learning but are stripped from the activation handed downstream.

use rand::{seq::IteratorRandom, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    column::{Column, ColumnActivation, ColumnSet},
    synapses::{PermanenceOptions, Synapses},
    topology::Topology,
};
use crate::error::{HtmError, Result};

/// How columns compete for activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inhibition {
    /// The top `target_density` fraction of all columns win.
    Global,
    /// A column wins if it is among the top `target_density` fraction of its neighborhood.
    Local { radius: usize },
}

/// Parameters for a `ColumnPool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnPoolParams {
    /// Radius (in input space) around a column's center from which potential synapses are drawn.
    /// `None` uses the entire input space.
    pub potential_radius: Option<usize>,

    /// Fraction of the inputs within the potential radius that become potential synapses.
    pub potential_percentage: f64,

    /// Fraction of each column's potential synapses that start out connected.
    pub init_connected_percentage: f32,

    /// How permanences are incremented, decremented, trimmed and when they count as connected.
    pub permanence: PermanenceOptions,

    /// The minimum boosted overlap a column must have to win.
    pub stimulus_threshold: f32,

    /// Target fraction of active columns.
    pub target_density: f32,

    pub inhibition: Inhibition,

    /// How strongly boosting reacts to a column being less active than its neighborhood. Zero disables boosting.
    pub boost_strength: f32,

    /// The window (in iterations) over which duty cycles are averaged.
    pub duty_cycle_period: u32,

    /// Fraction of the maximum overlap duty cycle below which a column's permanences are bumped up.
    pub min_percentage_overlap_duty_cycles: f32,

    /// How often (in iterations) the minimum overlap duty cycles are recomputed.
    pub update_period: u32,

    /// If true, neighborhoods wrap around the edges of the input and column spaces.
    pub wrap_around: bool,

    /// Whether unlearned columns are removed from the output activation.
    pub strip_unlearned: bool,

    /// A column's active duty cycle must be strictly above this to count as learned.
    pub min_activation_duty_cycle: f32,
}

impl Default for ColumnPoolParams {
    fn default() -> Self {
        Self {
            potential_radius: Some(16),
            potential_percentage: 0.5,
            init_connected_percentage: 0.5,
            permanence: PermanenceOptions::default(),
            stimulus_threshold: 0.0,
            target_density: 0.02,
            inhibition: Inhibition::Global,
            boost_strength: 3.0,
            duty_cycle_period: 1000,
            min_percentage_overlap_duty_cycles: 0.001,
            update_period: 50,
            wrap_around: true,
            strip_unlearned: true,
            min_activation_duty_cycle: 0.0,
        }
    }
}

fn unit_interval(name: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(HtmError::invalid(name, format!("{value} is outside [0, 1]")))
    }
}

impl ColumnPoolParams {
    /// Checks that every parameter is within its valid range.
    pub fn validate(&self) -> Result<()> {
        let p = &self.permanence;

        unit_interval("column_pool.potential_percentage", self.potential_percentage)?;
        unit_interval(
            "column_pool.init_connected_percentage",
            self.init_connected_percentage as f64,
        )?;
        unit_interval("column_pool.permanence.connected", p.connected as f64)?;
        unit_interval("column_pool.permanence.active_increment", p.active_increment as f64)?;
        unit_interval(
            "column_pool.permanence.inactive_decrement",
            p.inactive_decrement as f64,
        )?;
        unit_interval(
            "column_pool.permanence.below_stimulus_increment",
            p.below_stimulus_increment as f64,
        )?;
        unit_interval("column_pool.permanence.min", p.min as f64)?;
        unit_interval("column_pool.permanence.max", p.max as f64)?;
        unit_interval("column_pool.permanence.trim_threshold", p.trim_threshold as f64)?;
        unit_interval(
            "column_pool.min_percentage_overlap_duty_cycles",
            self.min_percentage_overlap_duty_cycles as f64,
        )?;
        unit_interval(
            "column_pool.min_activation_duty_cycle",
            self.min_activation_duty_cycle as f64,
        )?;

        if p.min > p.max {
            return Err(HtmError::invalid(
                "column_pool.permanence.min",
                format!("min {} exceeds max {}", p.min, p.max),
            ));
        }
        if !(self.target_density > 0.0 && self.target_density <= 1.0) {
            return Err(HtmError::invalid(
                "column_pool.target_density",
                format!("{} is outside (0, 1]", self.target_density),
            ));
        }
        if !self.stimulus_threshold.is_finite() || self.stimulus_threshold < 0.0 {
            return Err(HtmError::invalid(
                "column_pool.stimulus_threshold",
                "must be finite and non-negative",
            ));
        }
        if !self.boost_strength.is_finite() || self.boost_strength < 0.0 {
            return Err(HtmError::invalid(
                "column_pool.boost_strength",
                "must be finite and non-negative",
            ));
        }
        if self.duty_cycle_period == 0 {
            return Err(HtmError::invalid("column_pool.duty_cycle_period", "must be at least 1"));
        }
        if self.update_period == 0 {
            return Err(HtmError::invalid("column_pool.update_period", "must be at least 1"));
        }

        Ok(())
    }
}

/// The ColumnPool manages a set of columns that compete to represent the input space.
/// It computes overlaps, applies inhibition, boosts weak columns, and adapts synapses during learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnPool {
    params: ColumnPoolParams,

    /// The total number of compute iterations performed so far (whether learning or not).
    iteration_num: u64,

    /// The number of compute iterations performed so far with learning enabled.
    iteration_learn_num: u64,

    num_inputs: usize,
    num_columns: usize,

    input_topology: Topology,
    column_topology: Topology,

    /// Stores a contiguous block of potential synapses for every column.
    synapses: Synapses,

    /// Rolling average of how often each column has an overlap > 0.
    overlap_duty_cycles: Vec<f32>,

    /// Rolling average of how often each column wins inhibition.
    active_duty_cycles: Vec<f32>,

    /// Columns whose overlap duty cycle falls below this get their permanences bumped up.
    min_overlap_duty_cycles: Vec<f32>,

    /// Multiplier applied to each column's overlap. Always at least 1.
    boost_factors: Vec<f32>,
}

impl ColumnPool {
    /// Creates a new `ColumnPool` and seeds every column's potential pool and permanences from `rng`.
    pub fn new<R: Rng + ?Sized>(
        input_dimensions: &[usize],
        column_dimensions: &[usize],
        params: ColumnPoolParams,
        rng: &mut R,
    ) -> Result<Self> {
        params.validate()?;
        check_dimensions("input_dimensions", input_dimensions)?;
        check_dimensions("column_dimensions", column_dimensions)?;
        if input_dimensions.len() != column_dimensions.len() {
            return Err(HtmError::invalid(
                "column_dimensions",
                format!(
                    "{} column dimensions cannot be mapped onto {} input dimensions",
                    column_dimensions.len(),
                    input_dimensions.len()
                ),
            ));
        }

        let input_topology = Topology::new(input_dimensions);
        let column_topology = Topology::new(column_dimensions);
        let num_inputs = input_topology.num_elements();
        let num_columns = column_topology.num_elements();

        let max_pool = match params.potential_radius {
            Some(radius) => input_topology.max_neighborhood_size(radius),
            None => num_inputs,
        };
        let capacity = potential_synapses(max_pool, params.potential_percentage);

        let mut pool = Self {
            params,
            iteration_num: 0,
            iteration_learn_num: 0,
            num_inputs,
            num_columns,
            input_topology,
            column_topology,
            synapses: Synapses::new(num_columns, capacity),
            overlap_duty_cycles: vec![0.0; num_columns],
            active_duty_cycles: vec![0.0; num_columns],
            min_overlap_duty_cycles: vec![0.0; num_columns],
            boost_factors: vec![1.0; num_columns],
        };

        pool.connect_and_configure_inputs(rng);

        debug!(
            num_inputs,
            num_columns,
            potential_pool = capacity,
            "column pool initialized"
        );

        Ok(pool)
    }

    /// Processes the current input vector and returns the active columns.
    /// - Calculates overlaps between columns and the input, multiplied by each column's boost.
    /// - Performs inhibition to pick winner columns.
    ///
    /// If `learn` is true:
    /// - Updates synapse permanence values of the winners.
    /// - Updates duty cycles and boost factors.
    /// - Bumps up weak columns and periodically refreshes minimum duty cycles.
    ///
    /// Unlearned winners are stripped from the returned activation (not from learning).
    /// An input of the wrong length is rejected before any state changes.
    pub fn compute(&mut self, input: &[bool], learn: bool) -> Result<ColumnActivation> {
        if input.len() != self.num_inputs {
            return Err(HtmError::InputLength {
                expected: self.num_inputs,
                got: input.len(),
            });
        }

        self.update_iteration_number(learn);
        let overlaps = self.calculate_overlaps(input);
        let boosted = self.boosted_overlaps(&overlaps);
        let winners = self.inhibit_columns(&boosted);

        if learn {
            self.adapt_synapses(input, &winners);
            self.update_duty_cycles(&overlaps, &winners);
            self.bump_up_weak_columns();
            self.update_boost_factors();
            if self.iteration_num % self.params.update_period as u64 == 0 {
                self.update_min_duty_cycles();
            }
        }

        let active = if self.params.strip_unlearned {
            self.strip_unlearned_columns(winners)
        } else {
            winners
        };

        trace!(
            iteration = self.iteration_num,
            active = active.len(),
            "column pool computed"
        );

        Ok(ColumnSet::from_sorted_unchecked(active))
    }

    /// Counts, for each column, how many connected synapses map to an active input bit.
    pub fn calculate_overlaps(&self, input: &[bool]) -> Vec<f32> {
        (0..self.num_columns)
            .map(|col| {
                self.synapses
                    .column_connected(col)
                    .iter()
                    .filter(|syn| input[syn.input])
                    .count() as f32
            })
            .collect()
    }

    /// Multiplies each column's overlap by its boost factor.
    fn boosted_overlaps(&self, overlaps: &[f32]) -> Vec<f32> {
        overlaps
            .iter()
            .zip(&self.boost_factors)
            .map(|(&overlap, &boost)| overlap * boost)
            .collect()
    }

    /// Increments the global iteration counters, including a separate counter if `learn` is true.
    fn update_iteration_number(&mut self, learn: bool) {
        self.iteration_num += 1;
        if learn {
            self.iteration_learn_num += 1;
        }
    }

    /// Selects the winning columns, ascending by index.
    /// Columns without any overlap, or below the stimulus threshold, never win.
    fn inhibit_columns(&self, boosted: &[f32]) -> Vec<usize> {
        match self.params.inhibition {
            Inhibition::Global => self.inhibit_columns_global(boosted),
            Inhibition::Local { radius } => self.inhibit_columns_local(boosted, radius),
        }
    }

    /// Global inhibition: columns are sorted by boosted overlap (ties by lowest index) and the top fraction is kept.
    fn inhibit_columns_global(&self, boosted: &[f32]) -> Vec<usize> {
        let num_active = active_count(self.params.target_density, self.num_columns);
        let mut candidates: Vec<usize> = (0..self.num_columns).collect();
        candidates.sort_unstable_by(|&a, &b| boosted[b].total_cmp(&boosted[a]).then(a.cmp(&b)));

        let mut winners: Vec<usize> = candidates
            .into_iter()
            .take(num_active)
            .take_while(|&col| self.can_win(boosted[col]))
            .collect();
        winners.sort_unstable();
        winners
    }

    /// Local inhibition: a column wins if fewer than `density * neighborhood size` neighbors beat it.
    /// A neighbor beats a column with a higher boosted overlap, or an equal one and a lower index.
    fn inhibit_columns_local(&self, boosted: &[f32], radius: usize) -> Vec<usize> {
        let wrap = self.params.wrap_around;
        let mut winners = Vec::new();

        for col in 0..self.num_columns {
            let value = boosted[col];
            if !self.can_win(value) {
                continue;
            }

            let neighborhood = self.column_topology.neighborhood(col, radius, wrap);
            let num_active = active_count(self.params.target_density, neighborhood.size_hint().0);
            let mut stronger = 0;

            for other in neighborhood {
                if other != col
                    && (boosted[other] > value || (boosted[other] == value && other < col))
                {
                    stronger += 1;
                    if stronger >= num_active {
                        break;
                    }
                }
            }

            if stronger < num_active {
                winners.push(col);
            }
        }

        winners
    }

    #[inline]
    fn can_win(&self, boosted_overlap: f32) -> bool {
        boosted_overlap > 0.0 && boosted_overlap >= self.params.stimulus_threshold
    }

    /// Hebbian learning on the winners: potential synapses onto active bits are incremented,
    /// those onto inactive bits are decremented. Permanences are then trimmed, clamped and re-sorted.
    fn adapt_synapses(&mut self, input: &[bool], winners: &[usize]) {
        let options = &self.params.permanence;
        let stimulus = self.stimulus_count();

        for &col in winners {
            for syn in self.synapses.column_mut(col) {
                if input[syn.input] {
                    syn.permanence += options.active_increment;
                } else {
                    syn.permanence -= options.inactive_decrement;
                }
            }
            self.synapses
                .update_column_permanences(col, true, stimulus, options);
        }
    }

    /// Updates the exponential moving averages of overlap and activity.
    fn update_duty_cycles(&mut self, overlaps: &[f32], winners: &[usize]) {
        let period = self.iteration_num.min(self.params.duty_cycle_period as u64) as f32;
        let factor = (period - 1.0) / period;
        let step = 1.0 / period;

        self.overlap_duty_cycles
            .iter_mut()
            .zip(overlaps)
            .for_each(|(duty, &overlap)| {
                *duty = *duty * factor + if overlap > 0.0 { step } else { 0.0 };
            });
        self.active_duty_cycles
            .iter_mut()
            .for_each(|duty| *duty *= factor);
        for &col in winners {
            self.active_duty_cycles[col] += step;
        }
    }

    /// Columns whose overlap duty cycle is below their minimum get all permanences raised,
    /// giving them a chance to connect to the input at all.
    fn bump_up_weak_columns(&mut self) {
        let options = &self.params.permanence;
        let stimulus = self.stimulus_count();

        for (col, &overlap_dc) in self.overlap_duty_cycles.iter().enumerate() {
            if self.min_overlap_duty_cycles[col] > overlap_dc {
                for syn in self.synapses.column_mut(col) {
                    syn.permanence += options.below_stimulus_increment;
                }
                self.synapses
                    .update_column_permanences(col, true, stimulus, options);
            }
        }
    }

    /// Recomputes each column's boost factor from its active duty cycle relative to its neighborhood:
    /// `boost = exp(strength * (neighborhood mean - own duty))`, floored at 1.
    ///
    /// All neighborhood means are read before any boost factor is written.
    fn update_boost_factors(&mut self) {
        let strength = self.params.boost_strength;
        if strength == 0.0 {
            return;
        }

        let targets: Vec<f32> = match self.params.inhibition {
            Inhibition::Global => {
                let mean =
                    self.active_duty_cycles.iter().sum::<f32>() / self.num_columns as f32;
                vec![mean; self.num_columns]
            }
            Inhibition::Local { radius } => (0..self.num_columns)
                .map(|col| self.neighborhood_mean_duty_cycle(col, radius))
                .collect(),
        };

        self.boost_factors
            .iter_mut()
            .zip(&targets)
            .zip(&self.active_duty_cycles)
            .for_each(|((boost, &target), &duty)| {
                *boost = ((target - duty) * strength).exp().max(1.0);
            });
    }

    /// Mean active duty cycle over a column's neighborhood in column space.
    fn neighborhood_mean_duty_cycle(&self, column: usize, radius: usize) -> f32 {
        let (sum, count) = self
            .column_topology
            .neighborhood(column, radius, self.params.wrap_around)
            .fold((0.0f32, 0usize), |(sum, count), col| {
                (sum + self.active_duty_cycles[col], count + 1)
            });
        sum / count.max(1) as f32
    }

    /// Sets each column's minimum overlap duty cycle to a fraction of the global maximum.
    fn update_min_duty_cycles(&mut self) {
        let max_overlap = self
            .overlap_duty_cycles
            .iter()
            .fold(0.0f32, |acc, &x| acc.max(x));
        let min = self.params.min_percentage_overlap_duty_cycles * max_overlap;
        self.min_overlap_duty_cycles.fill(min);

        debug!(
            iteration = self.iteration_num,
            min_overlap_duty_cycle = min,
            "refreshed minimum duty cycles"
        );
    }

    /// Removes columns that have not yet been active often enough to count as learned.
    fn strip_unlearned_columns(&self, mut winners: Vec<usize>) -> Vec<usize> {
        let threshold = self.params.min_activation_duty_cycle;
        winners.retain(|&col| self.active_duty_cycles[col] > threshold);
        winners
    }

    /// Number of connected synapses a column needs to reach the stimulus threshold.
    fn stimulus_count(&self) -> usize {
        (self.params.stimulus_threshold + 0.5) as usize
    }

    /// Samples every column's potential pool and seeds its permanences.
    fn connect_and_configure_inputs<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let stimulus = self.stimulus_count();

        for column in 0..self.num_columns {
            let potential = self.map_potential(column, rng);
            self.synapses.init_column(
                column,
                &potential,
                self.params.init_connected_percentage,
                &self.params.permanence,
                rng,
            );
            self.synapses
                .update_column_permanences(column, true, stimulus, &self.params.permanence);
        }
    }

    /// Samples `potential_percentage` of the input bits within the potential radius of a column's center.
    fn map_potential<R: Rng + ?Sized>(&self, column: usize, rng: &mut R) -> Vec<usize> {
        let mut sample = match self.params.potential_radius {
            Some(radius) => {
                let center = self.map_column(column);
                let neighborhood =
                    self.input_topology
                        .neighborhood(center, radius, self.params.wrap_around);
                let size =
                    potential_synapses(neighborhood.size_hint().0, self.params.potential_percentage);
                neighborhood.choose_multiple(rng, size)
            }
            None => {
                let size = potential_synapses(self.num_inputs, self.params.potential_percentage);
                (0..self.num_inputs).choose_multiple(rng, size)
            }
        };
        sample.sort_unstable();
        sample
    }

    /// Maps a column index to its "center" input index by scaling its coordinates into input space.
    fn map_column(&self, column: usize) -> usize {
        let coords: Vec<usize> = self
            .column_topology
            .coordinates(column)
            .into_iter()
            .zip(self.column_topology.dimensions())
            .zip(self.input_topology.dimensions())
            .map(|((index, &col_dim), &in_dim)| {
                let new_index = ((index as f32 / col_dim as f32) * in_dim as f32
                    + (in_dim as f32 / col_dim as f32) * 0.5) as usize;
                new_index.min(in_dim - 1)
            })
            .collect();
        self.input_topology.index_from_coordinates(&coords)
    }

    pub fn params(&self) -> &ColumnPoolParams {
        &self.params
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn iteration_num(&self) -> u64 {
        self.iteration_num
    }

    pub fn iteration_learn_num(&self) -> u64 {
        self.iteration_learn_num
    }

    pub fn boost_factors(&self) -> &[f32] {
        &self.boost_factors
    }

    pub fn active_duty_cycles(&self) -> &[f32] {
        &self.active_duty_cycles
    }

    pub fn overlap_duty_cycles(&self) -> &[f32] {
        &self.overlap_duty_cycles
    }

    /// A read-only view of one column, or `None` if out of range.
    pub fn column(&self, index: usize) -> Option<Column<'_>> {
        (index < self.num_columns).then(|| Column {
            index,
            synapses: self.synapses.column(index),
            connected: self.synapses.connected_count(index),
            boost_factor: self.boost_factors[index],
            active_duty_cycle: self.active_duty_cycles[index],
        })
    }
}

/// How many potential synapses a column gets from a neighborhood of `input_size` bits.
fn potential_synapses(input_size: usize, potential_percentage: f64) -> usize {
    ((input_size as f64 * potential_percentage) + 0.5) as usize
}

/// How many columns out of `size` should be active at `density`. At least one.
fn active_count(density: f32, size: usize) -> usize {
    ((density * size as f32 + 0.5) as usize).max(1)
}

fn check_dimensions(name: &'static str, dims: &[usize]) -> Result<()> {
    if dims.is_empty() || dims.contains(&0) {
        return Err(HtmError::invalid(
            name,
            format!("{dims:?} must be non-empty with every dimension at least 1"),
        ));
    }
    Ok(())
}
