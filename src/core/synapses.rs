//! A `ProximalSynapse` models a single potential connection between a column and an input bit.
//!
//! If the permanence is at or above the connected threshold, the synapse is considered "connected"
//! and counts toward the column's overlap score. During learning, permanence is increased or
//! decreased depending on whether the corresponding input bit was active.
//!
//! The centralized `Synapses` struct is a pool that stores the potential synapses of all columns
//! in a single contiguous vec. Each column's synapses occupy a contiguous subrange of that vec,
//! and are kept sorted so that connected synapses sit at the front of the subrange.
//! Overlap computation then only has to walk the connected prefix.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::Permanence;

/// A synapse connecting an input bit to a column, with its permanence value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximalSynapse {
    /// The input bit this synapse connects to.
    pub input: usize,

    /// The strength of the connection.
    pub permanence: Permanence,
}

/// Options governing how proximal permanences are adjusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermanenceOptions {
    /// Subtracted from synapses of a winning column whose input bit was inactive.
    pub inactive_decrement: Permanence,
    /// Added to synapses of a winning column whose input bit was active.
    pub active_increment: Permanence,
    /// Permanence at or above which a synapse is connected.
    pub connected: Permanence,
    /// Added to every synapse of a column with too few connected synapses.
    pub below_stimulus_increment: Permanence,
    pub min: Permanence,
    pub max: Permanence,
    /// Permanences at or below this are snapped to zero.
    pub trim_threshold: Permanence,
}

impl Default for PermanenceOptions {
    fn default() -> Self {
        Self {
            inactive_decrement: 0.008,
            active_increment: 0.05,
            connected: 0.10,
            below_stimulus_increment: 0.10 / 10.0,
            min: 0.0,
            max: 1.0,
            trim_threshold: 0.05 / 2.0,
        }
    }
}

/// A flat pool of potential synapses for all columns.
/// Each column is allotted a contiguous region in the internal synapses vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapses {
    /// All potential synapses for each column.
    synapses: Vec<ProximalSynapse>,

    /// The number of synapses stored for each column.
    synapse_count_per_column: Vec<usize>,

    /// The number of connected synapses for each column after pivot sorting.
    connected_synapse_count_per_column: Vec<usize>,

    /// The maximum number of synapses allowed per column.
    max_synapses_per_column: usize,
}

impl Synapses {
    /// Creates a new synapse pool for `num_columns` columns with capacity `max_potential` per column.
    pub fn new(num_columns: usize, max_potential: usize) -> Self {
        Self {
            synapses: vec![ProximalSynapse::default(); num_columns * max_potential],
            synapse_count_per_column: vec![0; num_columns],
            connected_synapse_count_per_column: vec![0; num_columns],
            max_synapses_per_column: max_potential,
        }
    }

    /// Initializes the potential pool of a column from the given input indices.
    /// Roughly `init_connected_percentage` of them start out connected.
    ///
    /// `potential` must not hold more indices than the per-column capacity.
    pub fn init_column<R: Rng + ?Sized>(
        &mut self,
        column: usize,
        potential: &[usize],
        init_connected_percentage: f32,
        options: &PermanenceOptions,
        rng: &mut R,
    ) {
        let count = potential.len().min(self.max_synapses_per_column);
        let column_start = column * self.max_synapses_per_column;

        for (slot, &input) in self.synapses[column_start..column_start + count]
            .iter_mut()
            .zip(potential)
        {
            let random = if rng.random::<f32>() <= init_connected_percentage {
                options.connected + (options.max - options.connected) * rng.random::<f32>()
            } else {
                options.connected * rng.random::<f32>()
            };

            let permanence = if random > options.trim_threshold {
                (random * 100_000.0).round() / 100_000.0
            } else {
                0.0
            };

            *slot = ProximalSynapse { input, permanence };
        }

        self.synapse_count_per_column[column] = count;
        self.sort_column(column, options.connected);
    }

    /// Reorders the synapses in a column so that those with permanence ≥ `connected_threshold` come first.
    pub fn sort_column(&mut self, column: usize, connected_threshold: Permanence) {
        let range = self.col_range(column);
        let slice = &mut self.synapses[range];

        let mut pivot = 0;

        for i in 0..slice.len() {
            if slice[i].permanence >= connected_threshold {
                slice.swap(i, pivot);
                pivot += 1;
            }
        }

        self.connected_synapse_count_per_column[column] = pivot;
    }

    /// Updates permanence values in a column:
    /// - if `raise_permanences` is true, first raise values until `stimulus_threshold` synapses are connected,
    /// - then trim low values to zero and clamp the rest to [options.min, options.max],
    /// - finally re-sort the column so that connected synapses come first.
    pub fn update_column_permanences(
        &mut self,
        column: usize,
        raise_permanences: bool,
        stimulus_threshold: usize,
        options: &PermanenceOptions,
    ) {
        if raise_permanences {
            self.raise_column_permanences(column, stimulus_threshold, options);
        }

        for syn in self.column_mut(column) {
            if syn.permanence <= options.trim_threshold {
                syn.permanence = 0.0;
            } else {
                syn.permanence = syn.permanence.clamp(options.min, options.max);
            }
        }

        self.sort_column(column, options.connected);
    }

    /// Raises every permanence in a column until at least `stimulus_threshold` synapses are connected.
    /// A column with fewer potential synapses than the threshold is raised until all of them are connected.
    pub fn raise_column_permanences(
        &mut self,
        column: usize,
        stimulus_threshold: usize,
        options: &PermanenceOptions,
    ) {
        let slice = self.column_mut(column);
        let target = stimulus_threshold.min(slice.len());

        if options.below_stimulus_increment <= 0.0 {
            return;
        }

        while slice
            .iter()
            .filter(|syn| syn.permanence >= options.connected)
            .count()
            < target
        {
            for syn in slice.iter_mut() {
                syn.permanence += options.below_stimulus_increment;
            }
        }
    }

    /// Returns the index range corresponding to the synapses stored for the given column.
    fn col_range(&self, column: usize) -> Range<usize> {
        let start = column * self.max_synapses_per_column;
        let end = start + self.synapse_count_per_column[column];
        start..end
    }

    /// Returns the index range corresponding to the first `size` synapses stored for the given column.
    fn col_range_sized(&self, column: usize, size: usize) -> Range<usize> {
        let start = column * self.max_synapses_per_column;
        let end = start + size;
        start..end
    }

    /// All potential synapses of a column, connected ones first.
    pub fn column(&self, column: usize) -> &[ProximalSynapse] {
        &self.synapses[self.col_range(column)]
    }

    /// Mutable access to the potential synapses of a column.
    /// Callers must re-sort the column afterwards if they change permanences.
    pub fn column_mut(&mut self, column: usize) -> &mut [ProximalSynapse] {
        let r = self.col_range(column);
        &mut self.synapses[r]
    }

    /// The connected synapses of a column.
    pub fn column_connected(&self, column: usize) -> &[ProximalSynapse] {
        &self.synapses
            [self.col_range_sized(column, self.connected_synapse_count_per_column[column])]
    }

    /// Number of connected synapses of a column.
    pub fn connected_count(&self, column: usize) -> usize {
        self.connected_synapse_count_per_column[column]
    }
}
