//! Columns and sets of columns.
//!
//! A column is one feature detector of the `ColumnPool`. Its learned state (proximal permanences,
//! boost factor and duty cycle) lives in the pool's flat tables; `Column` is a borrowed view
//! over one column's slice of them.
//!
//! `ColumnSet` is the sparse representation passed between pipeline stages: the active columns
//! chosen by the pool each tick, and the columns the sequence memory predicts for the next tick.
//! Indices are kept sorted and unique so that set operations are linear merges and the
//! representation is canonical (two equal sets are byte-identical when checkpointed).

use serde::{Deserialize, Serialize};

use super::synapses::ProximalSynapse;

/// A read-only view of one column's learned state.
#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    /// The index of the column.
    pub index: usize,
    /// Potential synapses, connected ones first.
    pub synapses: &'a [ProximalSynapse],
    /// How many of `synapses` are connected.
    pub connected: usize,
    pub boost_factor: f32,
    pub active_duty_cycle: f32,
}

impl Column<'_> {
    /// The connected synapses of this column.
    pub fn connected_synapses(&self) -> &[ProximalSynapse] {
        &self.synapses[..self.connected]
    }
}

/// A sorted set of column indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSet {
    columns: Vec<usize>,
}

/// The sparse set of columns that won competition in one tick.
pub type ColumnActivation = ColumnSet;

/// The columns holding at least one predictive cell.
pub type PredictedColumns = ColumnSet;

impl ColumnSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from arbitrary indices; duplicates are dropped.
    pub fn from_sparse(mut columns: Vec<usize>) -> Self {
        columns.sort_unstable();
        columns.dedup();
        Self { columns }
    }

    /// Builds a set from a dense activation vector.
    pub fn from_dense(dense: &[bool]) -> Self {
        Self {
            columns: dense
                .iter()
                .enumerate()
                .filter_map(|(i, &on)| on.then_some(i))
                .collect(),
        }
    }

    /// Builds a set from indices already sorted ascending without duplicates.
    pub(crate) fn from_sorted_unchecked(columns: Vec<usize>) -> Self {
        debug_assert!(columns.windows(2).all(|w| w[0] < w[1]));
        Self { columns }
    }

    /// The indices, ascending.
    pub fn as_slice(&self) -> &[usize] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: usize) -> bool {
        self.columns.binary_search(&column).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().copied()
    }

    /// Largest index in the set.
    pub fn max(&self) -> Option<usize> {
        self.columns.last().copied()
    }

    /// Size of the intersection with `other`.
    pub fn overlap(&self, other: &ColumnSet) -> usize {
        let (mut i, mut j, mut count) = (0, 0, 0);

        while i < self.columns.len() && j < other.columns.len() {
            match self.columns[i].cmp(&other.columns[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    count += 1;
                    i += 1;
                    j += 1;
                }
            }
        }

        count
    }

    /// Dense activation vector of length `size`. Indices at or past `size` are ignored.
    pub fn to_dense(&self, size: usize) -> Vec<bool> {
        let mut dense = vec![false; size];
        for &col in self.columns.iter().take_while(|&&c| c < size) {
            dense[col] = true;
        }
        dense
    }
}

impl FromIterator<usize> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_sparse(iter.into_iter().collect())
    }
}

impl From<Vec<usize>> for ColumnSet {
    fn from(columns: Vec<usize>) -> Self {
        Self::from_sparse(columns)
    }
}
