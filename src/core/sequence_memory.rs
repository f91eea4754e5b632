//! The `SequenceMemory` learns temporal structure over the sequence of column activations.
//!
//! Every column owns a fixed number of cells. Each cell can grow dendritic segments, and each
//! segment holds synapses onto presynaptic cells. Cells are addressed by a flat index
//! (`column * cells_per_column + offset`), synapses store that index rather than a reference,
//! and segments are addressed by `(cell, segment)` pairs.
//!
//! Column:
//! - A group of cells that share common feed-forward input from the `ColumnPool`.
//!
//! Cell:
//! - Represents one context in which its column's input can occur.
//!
//! Segment:
//! - A cluster of synapses on a cell that detects a pattern of previous cell activity.
//! - A segment is *active* when at least `activation_threshold` of its connected synapses
//!   see an active cell, and *matching* when at least `learning_threshold` of its synapses
//!   (connected or not) do.
//!
//! Bursting:
//! - When a column becomes active but none of its cells was predicted, all of its cells become active.
//! - One cell (the best matching one, else the least recently used one) is chosen as winner and learns.
//!
//! How it works:
//! - In each active column, cells with an active segment from the previous step become active.
//! - Columns without such a cell burst.
//! - Correct segments are reinforced towards the previously active cells, and a bounded number of
//!   their other synapses decay. Bursting winners grow a segment onto the previous winner cells.
//! - Finally, segment activity over the new active cells is evaluated to produce the predictions
//!   for the next step.
//!
//! There is no randomness: synapse growth samples candidates in a fixed hash order and
//! every tie is broken by the lowest index.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::mem;
use tracing::trace;

use super::column::{ColumnSet, PredictedColumns};
use crate::error::{HtmError, Result};
use crate::Permanence;

/// Flat index of a cell: `column * cells_per_column + offset`.
pub type CellIdx = usize;

/// Addresses one segment of one cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentRef {
    pub cell: CellIdx,
    pub segment: usize,
}

/// A synapse from a segment to a presynaptic cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub presynaptic_cell: CellIdx,
    pub permanence: Permanence,
}

/// A dendritic segment: a list of synapses belonging to one cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    synapses: Vec<Synapse>,
    /// Iteration at which this segment was last created or learned on.
    last_used: u64,
}

impl Segment {
    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }
}

/// A cell and the segments it owns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    segments: Vec<Segment>,
    /// Iteration at which this cell was last chosen as a bursting winner.
    last_used: u64,
}

impl Cell {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// The actions taken on a column during one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Activate,
    Burst,
    Punish,
}

/// Parameters for the sequence memory's activation and learning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceMemoryParams {
    /// Active connected synapses needed for a segment to make its cell predictive.
    pub activation_threshold: usize,
    /// Active potential synapses needed for a segment to be matching.
    pub learning_threshold: usize,
    /// Target number of active synapses a learning segment grows towards.
    pub new_synapse_count: usize,
    pub initial_permanence: Permanence,
    pub connected_permanence: Permanence,
    pub permanence_increment: Permanence,
    pub permanence_decrement: Permanence,
    /// Subtracted from matching segments in columns that did not become active. Zero disables it.
    pub predicted_decrement: Permanence,
    /// At most this many non-reinforced synapses decay per segment update.
    pub max_decayed_synapses: usize,
    pub max_segments_per_cell: usize,
    pub max_synapses_per_segment: usize,
}

impl Default for SequenceMemoryParams {
    fn default() -> Self {
        Self {
            activation_threshold: 12,
            learning_threshold: 8,
            new_synapse_count: 15,
            initial_permanence: 0.5,
            connected_permanence: 0.8,
            permanence_increment: 0.1,
            permanence_decrement: 0.1,
            predicted_decrement: 0.0,
            max_decayed_synapses: 15,
            max_segments_per_cell: 255,
            max_synapses_per_segment: 255,
        }
    }
}

impl SequenceMemoryParams {
    /// Checks that every parameter is within its valid range.
    pub fn validate(&self) -> Result<()> {
        let permanences = [
            ("sequence_memory.initial_permanence", self.initial_permanence),
            ("sequence_memory.connected_permanence", self.connected_permanence),
            ("sequence_memory.permanence_increment", self.permanence_increment),
            ("sequence_memory.permanence_decrement", self.permanence_decrement),
            ("sequence_memory.predicted_decrement", self.predicted_decrement),
        ];
        for (name, value) in permanences {
            if !(0.0..=1.0).contains(&value) {
                return Err(HtmError::invalid(name, format!("{value} is outside [0, 1]")));
            }
        }

        if self.activation_threshold == 0 {
            return Err(HtmError::invalid(
                "sequence_memory.activation_threshold",
                "must be at least 1",
            ));
        }
        if self.learning_threshold == 0 || self.learning_threshold > self.activation_threshold {
            return Err(HtmError::invalid(
                "sequence_memory.learning_threshold",
                format!(
                    "must be between 1 and the activation threshold ({})",
                    self.activation_threshold
                ),
            ));
        }
        if self.max_segments_per_cell == 0 {
            return Err(HtmError::invalid(
                "sequence_memory.max_segments_per_cell",
                "must be at least 1",
            ));
        }
        if self.max_synapses_per_segment == 0 {
            return Err(HtmError::invalid(
                "sequence_memory.max_synapses_per_segment",
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Active and winner cells of one step, ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellActivation {
    pub active: Vec<CellIdx>,
    pub winners: Vec<CellIdx>,
}

impl CellActivation {
    /// The columns owning at least one active cell.
    pub fn columns(&self, cells_per_column: usize) -> ColumnSet {
        cells_to_columns(&self.active, cells_per_column)
    }
}

/// The result of one `SequenceMemory::step`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceStep {
    pub active_cells: CellActivation,
    /// Cells that are predictive for the next step.
    pub predictive_cells: Vec<CellIdx>,
    /// Columns that are predicted for the next step.
    pub predicted_columns: PredictedColumns,
    /// Active columns that burst this step.
    pub bursting_columns: ColumnSet,
}

/// Previous-step state shared by the per-column phases of a step.
struct StepContext<'a> {
    prev_active: &'a [bool],
    prev_winner_cells: &'a [CellIdx],
    active_potential: &'a FxHashMap<SegmentRef, usize>,
    learn: bool,
}

/// Learns transitions between column activations and predicts the next one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceMemory {
    params: SequenceMemoryParams,
    num_columns: usize,
    cells_per_column: usize,
    cells: Vec<Cell>,

    // State produced by the latest step, consumed by the next one.
    active_cells: Vec<CellIdx>,
    winner_cells: Vec<CellIdx>,
    active_segments: Vec<SegmentRef>,
    /// Matching segments with their number of active potential synapses.
    matching_segments: Vec<(SegmentRef, usize)>,
    predictive_cells: Vec<CellIdx>,

    iteration: u64,
}

impl SequenceMemory {
    /// Creates a sequence memory of `num_columns` columns with `cells_per_column` cells each. No segments exist yet.
    pub fn new(
        num_columns: usize,
        cells_per_column: usize,
        params: SequenceMemoryParams,
    ) -> Result<Self> {
        params.validate()?;
        if num_columns == 0 {
            return Err(HtmError::invalid("column_dimensions", "must hold at least one column"));
        }
        if cells_per_column == 0 {
            return Err(HtmError::invalid("cells_per_column", "must be at least 1"));
        }

        Ok(Self {
            params,
            num_columns,
            cells_per_column,
            cells: vec![Cell::default(); num_columns * cells_per_column],
            active_cells: Vec::new(),
            winner_cells: Vec::new(),
            active_segments: Vec::new(),
            matching_segments: Vec::new(),
            predictive_cells: Vec::new(),
            iteration: 0,
        })
    }

    /// Executes one time step.
    ///
    /// - A column in `active_columns` that is also in `prev_predicted` and holds a cell with an
    ///   active segment from the previous step activates those cells.
    /// - Any other active column bursts.
    /// - With `learn`, segments are reinforced or grown, and matching segments in inactive columns are punished.
    /// - Segment activity over the new active cells yields the prediction for the next step.
    ///
    /// `prev_predicted` should be the `predicted_columns` returned by the previous call;
    /// columns missing from it are treated as unpredicted.
    pub fn step(
        &mut self,
        active_columns: &ColumnSet,
        prev_predicted: &PredictedColumns,
        learn: bool,
    ) -> Result<SequenceStep> {
        if let Some(column) = active_columns.max().filter(|&c| c >= self.num_columns) {
            return Err(HtmError::ColumnOutOfRange {
                column,
                num_columns: self.num_columns,
            });
        }

        self.iteration += 1;

        let prev_active_cells = mem::take(&mut self.active_cells);
        let prev_winner_cells = mem::take(&mut self.winner_cells);
        let prev_active_segments = mem::take(&mut self.active_segments);
        let prev_matching_segments = mem::take(&mut self.matching_segments);
        self.predictive_cells.clear();

        let prev_active = self.cell_mask(&prev_active_cells);
        let active_potential: FxHashMap<SegmentRef, usize> =
            prev_matching_segments.iter().copied().collect();

        let mut active_by_column: FxHashMap<usize, Vec<SegmentRef>> = FxHashMap::default();
        for &seg in &prev_active_segments {
            active_by_column
                .entry(self.column_of(seg.cell))
                .or_default()
                .push(seg);
        }
        let mut matching_by_column: FxHashMap<usize, Vec<(SegmentRef, usize)>> =
            FxHashMap::default();
        for &(seg, potential) in &prev_matching_segments {
            matching_by_column
                .entry(self.column_of(seg.cell))
                .or_default()
                .push((seg, potential));
        }

        let mut actions = Vec::with_capacity(active_columns.len() * 2);
        for col in active_columns.iter() {
            let predicted = prev_predicted.contains(col) && active_by_column.contains_key(&col);
            actions.push((col, if predicted { Action::Activate } else { Action::Burst }));
        }
        if learn && self.params.predicted_decrement > 0.0 {
            let mut last = None;
            for &(seg, _) in &prev_matching_segments {
                let col = self.column_of(seg.cell);
                if last != Some(col) && !active_columns.contains(col) {
                    actions.push((col, Action::Punish));
                }
                last = Some(col);
            }
        }

        let ctx = StepContext {
            prev_active: &prev_active,
            prev_winner_cells: &prev_winner_cells,
            active_potential: &active_potential,
            learn,
        };
        let mut bursting = Vec::new();

        for (col, action) in actions {
            match action {
                Action::Activate => {
                    let segments = active_by_column.get(&col).map(Vec::as_slice).unwrap_or(&[]);
                    self.activate_predicted_column(segments, &ctx);
                }
                Action::Burst => {
                    bursting.push(col);
                    let matching = matching_by_column
                        .get(&col)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    self.burst_column(col, matching, &ctx);
                }
                Action::Punish => {
                    let matching = matching_by_column
                        .get(&col)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    self.punish_predicted_column(matching, &ctx);
                }
            }
        }

        self.compute_segment_activity();

        let predicted_columns = cells_to_columns(&self.predictive_cells, self.cells_per_column);

        trace!(
            iteration = self.iteration,
            active_cells = self.active_cells.len(),
            bursting = bursting.len(),
            predicted_columns = predicted_columns.len(),
            "sequence memory step"
        );

        Ok(SequenceStep {
            active_cells: CellActivation {
                active: self.active_cells.clone(),
                winners: self.winner_cells.clone(),
            },
            predictive_cells: self.predictive_cells.clone(),
            predicted_columns,
            bursting_columns: ColumnSet::from_sorted_unchecked(bursting),
        })
    }

    /// Activates the cells of a correctly predicted column, one per active segment.
    ///
    /// If learning is enabled, each active segment is reinforced towards the previously active
    /// cells and grows synapses until it reaches `new_synapse_count` active ones.
    fn activate_predicted_column(&mut self, segments: &[SegmentRef], ctx: &StepContext<'_>) {
        for &seg in segments {
            if self.active_cells.last() != Some(&seg.cell) {
                self.active_cells.push(seg.cell);
                self.winner_cells.push(seg.cell);
            }

            if ctx.learn {
                self.adapt_segment(seg, ctx.prev_active);
                let active = ctx.active_potential.get(&seg).copied().unwrap_or(0);
                let new_synapses = self.params.new_synapse_count.saturating_sub(active);
                self.grow_synapses(seg, ctx.prev_winner_cells, new_synapses);
            }
        }
    }

    /// Bursts a column whose cells were not predicted:
    /// - Marks all cells in the column as active.
    /// - Picks the cell of the best matching segment as winner, else the least recently used cell.
    /// - If learning is enabled, the winner learns on its matching segment or on a newly grown one.
    ///
    /// Reinforcement covers synapses onto every previously active cell, but new synapses are only
    /// grown onto the previous step's winner cells, which are a subset of its active cells.
    fn burst_column(&mut self, col: usize, matching: &[(SegmentRef, usize)], ctx: &StepContext<'_>) {
        let start = col * self.cells_per_column;
        self.active_cells.extend(start..start + self.cells_per_column);

        let best = matching
            .iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|&(seg, _)| seg);

        let (winner, segment) = match best {
            Some(seg) => (seg.cell, Some(seg)),
            None => {
                let cell = self.least_used_cell(col);
                let segment = (ctx.learn && !ctx.prev_winner_cells.is_empty())
                    .then(|| self.grow_new_segment(cell));
                (cell, segment)
            }
        };

        self.winner_cells.push(winner);

        if ctx.learn {
            self.cells[winner].last_used = self.iteration;

            if let Some(seg) = segment {
                self.adapt_segment(seg, ctx.prev_active);
                let active = ctx.active_potential.get(&seg).copied().unwrap_or(0);
                let new_synapses = self.params.new_synapse_count.saturating_sub(active);
                self.grow_synapses(seg, ctx.prev_winner_cells, new_synapses);
            }
        }
    }

    /// Weakens matching segments of a column that was predicted but did not become active.
    fn punish_predicted_column(&mut self, matching: &[(SegmentRef, usize)], ctx: &StepContext<'_>) {
        let decrement = self.params.predicted_decrement;

        for &(seg, _) in matching {
            let segment = &mut self.cells[seg.cell].segments[seg.segment];
            for syn in segment.synapses.iter_mut() {
                if ctx.prev_active[syn.presynaptic_cell] {
                    syn.permanence = (syn.permanence - decrement).max(0.0);
                }
            }
            segment.synapses.retain(|syn| syn.permanence > 0.0);
        }
    }

    /// Reinforces synapses onto previously active cells and decays up to `max_decayed_synapses`
    /// of the others. Synapses that decay to zero are removed.
    fn adapt_segment(&mut self, seg: SegmentRef, prev_active: &[bool]) {
        let iteration = self.iteration;
        let params = &self.params;
        let segment = &mut self.cells[seg.cell].segments[seg.segment];
        let mut decayed = 0;

        for syn in segment.synapses.iter_mut() {
            if prev_active[syn.presynaptic_cell] {
                syn.permanence = (syn.permanence + params.permanence_increment).min(1.0);
            } else if decayed < params.max_decayed_synapses {
                syn.permanence = (syn.permanence - params.permanence_decrement).max(0.0);
                decayed += 1;
            }
        }

        segment.synapses.retain(|syn| syn.permanence > 0.0);
        segment.last_used = iteration;
    }

    /// The cell of a column that was least recently chosen as a winner, lowest offset first.
    fn least_used_cell(&self, col: usize) -> CellIdx {
        let start = col * self.cells_per_column;
        (start..start + self.cells_per_column)
            .min_by_key(|&cell| (self.cells[cell].last_used, cell))
            .unwrap_or(start)
    }

    /// Grows a new segment on a cell. A cell at `max_segments_per_cell` has its least recently
    /// used segment replaced in place, so existing segment indices stay valid.
    fn grow_new_segment(&mut self, cell: CellIdx) -> SegmentRef {
        let iteration = self.iteration;
        let capacity = self.params.new_synapse_count;
        let max_segments = self.params.max_segments_per_cell;
        let owner = &mut self.cells[cell];

        let fresh = Segment {
            synapses: Vec::with_capacity(capacity),
            last_used: iteration,
        };

        if owner.segments.len() >= max_segments {
            let lru = owner
                .segments
                .iter()
                .enumerate()
                .min_by_key(|(i, s)| (s.last_used, *i))
                .map(|(i, _)| i)
                .unwrap_or(0);
            owner.segments[lru] = fresh;
            trace!(cell, segment = lru, "replaced least recently used segment");
            return SegmentRef { cell, segment: lru };
        }

        owner.segments.push(fresh);
        SegmentRef {
            cell,
            segment: owner.segments.len() - 1,
        }
    }

    /// Grows up to `count` synapses from a segment onto `candidates` it is not yet connected to.
    ///
    /// Candidates are taken in a fixed pseudo-random order keyed on (candidate, owning cell).
    /// If the segment would exceed `max_synapses_per_segment`, its weakest synapses are evicted first.
    fn grow_synapses(&mut self, seg: SegmentRef, candidates: &[CellIdx], count: usize) {
        if count == 0 || candidates.is_empty() {
            return;
        }

        let initial = self.params.initial_permanence;
        let max_synapses = self.params.max_synapses_per_segment;
        let segment = &mut self.cells[seg.cell].segments[seg.segment];

        let mut fresh: Vec<CellIdx> = candidates
            .iter()
            .copied()
            .filter(|&c| !segment.synapses.iter().any(|s| s.presynaptic_cell == c))
            .collect();
        fresh.sort_by_cached_key(|&c| (fxhash::hash64(&(c, seg.cell)), c));
        fresh.truncate(count.min(max_synapses));

        let overflow = (segment.synapses.len() + fresh.len()).saturating_sub(max_synapses);
        if overflow > 0 {
            let mut order: Vec<usize> = (0..segment.synapses.len()).collect();
            order.sort_by(|&a, &b| {
                segment.synapses[a]
                    .permanence
                    .total_cmp(&segment.synapses[b].permanence)
                    .then(a.cmp(&b))
            });
            let mut evict = vec![false; segment.synapses.len()];
            for &i in order.iter().take(overflow) {
                evict[i] = true;
            }
            let mut i = 0;
            segment.synapses.retain(|_| {
                let keep = !evict[i];
                i += 1;
                keep
            });
        }

        trace!(cell = seg.cell, segment = seg.segment, grown = fresh.len(), "grew synapses");

        segment
            .synapses
            .extend(fresh.into_iter().map(|presynaptic_cell| Synapse {
                presynaptic_cell,
                permanence: initial,
            }));
    }

    /// Evaluates every segment against the current active cells, producing the active and
    /// matching segments and the predictive cells for the next step.
    fn compute_segment_activity(&mut self) {
        let active = self.cell_mask(&self.active_cells);
        let connected_permanence = self.params.connected_permanence;
        let mut active_segments = Vec::new();
        let mut matching_segments = Vec::new();
        let mut predictive_cells = Vec::new();

        for (cell_idx, cell) in self.cells.iter().enumerate() {
            let mut predictive = false;

            for (seg_idx, segment) in cell.segments.iter().enumerate() {
                let mut active_connected = 0;
                let mut active_potential = 0;

                for syn in &segment.synapses {
                    if active[syn.presynaptic_cell] {
                        active_potential += 1;
                        if syn.permanence >= connected_permanence {
                            active_connected += 1;
                        }
                    }
                }

                let seg = SegmentRef {
                    cell: cell_idx,
                    segment: seg_idx,
                };

                if active_connected >= self.params.activation_threshold {
                    active_segments.push(seg);
                    predictive = true;
                }
                if active_potential >= self.params.learning_threshold {
                    matching_segments.push((seg, active_potential));
                }
            }

            if predictive {
                predictive_cells.push(cell_idx);
            }
        }

        self.active_segments = active_segments;
        self.matching_segments = matching_segments;
        self.predictive_cells = predictive_cells;
    }

    /// Dense membership mask over all cells.
    fn cell_mask(&self, cells: &[CellIdx]) -> Vec<bool> {
        let mut mask = vec![false; self.cells.len()];
        for &cell in cells {
            mask[cell] = true;
        }
        mask
    }

    /// The column owning a cell.
    #[inline]
    pub fn column_of(&self, cell: CellIdx) -> usize {
        cell / self.cells_per_column
    }

    pub fn params(&self) -> &SequenceMemoryParams {
        &self.params
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn cells_per_column(&self) -> usize {
        self.cells_per_column
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, cell: CellIdx) -> Option<&Cell> {
        self.cells.get(cell)
    }

    /// Active cells of the latest step, ascending.
    pub fn active_cells(&self) -> &[CellIdx] {
        &self.active_cells
    }

    /// Winner cells of the latest step, ascending.
    pub fn winner_cells(&self) -> &[CellIdx] {
        &self.winner_cells
    }

    /// Cells predicted to become active in the next step, ascending.
    pub fn predictive_cells(&self) -> &[CellIdx] {
        &self.predictive_cells
    }

    /// Columns predicted to become active in the next step.
    pub fn predicted_columns(&self) -> PredictedColumns {
        cells_to_columns(&self.predictive_cells, self.cells_per_column)
    }

    pub fn num_segments(&self) -> usize {
        self.cells.iter().map(|c| c.segments.len()).sum()
    }

    pub fn num_synapses(&self) -> usize {
        self.cells
            .iter()
            .flat_map(|c| &c.segments)
            .map(|s| s.synapses.len())
            .sum()
    }
}

/// Columns owning the given (ascending) cells.
fn cells_to_columns(cells: &[CellIdx], cells_per_column: usize) -> ColumnSet {
    let mut columns: Vec<usize> = cells.iter().map(|&c| c / cells_per_column).collect();
    columns.dedup();
    ColumnSet::from_sorted_unchecked(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SequenceMemoryParams {
        SequenceMemoryParams {
            activation_threshold: 2,
            learning_threshold: 1,
            new_synapse_count: 3,
            initial_permanence: 0.6,
            connected_permanence: 0.5,
            permanence_increment: 0.1,
            permanence_decrement: 0.05,
            ..Default::default()
        }
    }

    fn set(columns: &[usize]) -> ColumnSet {
        ColumnSet::from_sparse(columns.to_vec())
    }

    #[test]
    fn rejects_invalid_construction() {
        assert!(SequenceMemory::new(8, 0, params()).is_err());
        assert!(SequenceMemory::new(0, 4, params()).is_err());

        let bad = SequenceMemoryParams {
            learning_threshold: 5,
            activation_threshold: 2,
            ..params()
        };
        assert!(SequenceMemory::new(8, 4, bad).is_err());
    }

    #[test]
    fn unpredicted_columns_burst() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();
        let step = tm.step(&set(&[1, 3]), &ColumnSet::new(), true).unwrap();

        assert_eq!(step.active_cells.active, vec![4, 5, 6, 7, 12, 13, 14, 15]);
        assert_eq!(step.active_cells.winners, vec![4, 12]);
        assert_eq!(step.bursting_columns, set(&[1, 3]));
        assert_eq!(step.active_cells.columns(4), set(&[1, 3]));
        assert!(step.predicted_columns.is_empty());
        // Nothing to connect to on the very first step.
        assert_eq!(tm.num_segments(), 0);
    }

    #[test]
    fn learns_a_transition_and_predicts_it() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();
        let a = set(&[0, 1, 2]);
        let b = set(&[3, 4, 5]);

        let s1 = tm.step(&a, &ColumnSet::new(), true).unwrap();
        let s2 = tm.step(&b, &s1.predicted_columns, true).unwrap();
        assert_eq!(tm.num_segments(), 3);
        assert!(s2.predicted_columns.is_empty());

        // A bursts again, which activates every cell the B segments listen to.
        let s3 = tm.step(&a, &s2.predicted_columns, true).unwrap();
        assert_eq!(s3.predicted_columns, b);

        let s4 = tm.step(&b, &s3.predicted_columns, true).unwrap();
        assert!(s4.bursting_columns.is_empty());
        assert_eq!(s4.active_cells.active, vec![12, 16, 20]);
    }

    /// Teaches A -> B and presents A again, so the segments on B's winners (12, 16, 20)
    /// are matching going into the next step.
    fn expecting_b(predicted_decrement: Permanence) -> SequenceMemory {
        let p = SequenceMemoryParams {
            predicted_decrement,
            ..params()
        };
        let mut tm = SequenceMemory::new(8, 4, p).unwrap();
        let a = set(&[0, 1, 2]);

        tm.step(&a, &ColumnSet::new(), true).unwrap();
        tm.step(&set(&[3, 4, 5]), &ColumnSet::new(), true).unwrap();
        let step = tm.step(&a, &ColumnSet::new(), true).unwrap();
        assert_eq!(step.predicted_columns, set(&[3, 4, 5]));

        // B's segments grew onto A's winners only, not onto every cell A burst.
        let mut targets: Vec<CellIdx> = tm.cells[12].segments[0]
            .synapses()
            .iter()
            .map(|s| s.presynaptic_cell)
            .collect();
        targets.sort_unstable();
        assert_eq!(targets, vec![0, 4, 8]);
        tm
    }

    #[test]
    fn wrong_predictions_are_punished() {
        let mut tm = expecting_b(0.2);
        // A synapse onto a cell that was not active is left alone.
        tm.cells[12].segments[0].synapses.push(Synapse {
            presynaptic_cell: 30,
            permanence: 0.6,
        });

        let prediction = tm.predicted_columns();
        let step = tm.step(&set(&[6]), &prediction, true).unwrap();
        assert_eq!(step.bursting_columns, set(&[6]));

        for cell in [12, 16, 20] {
            let synapses = tm.cells[cell].segments[0].synapses();
            for syn in synapses.iter().filter(|s| s.presynaptic_cell < 12) {
                assert!((syn.permanence - 0.4).abs() < 1e-6, "cell {cell}: {synapses:?}");
            }
        }
        let untouched = tm.cells[12].segments[0].synapses().last().unwrap();
        assert_eq!((untouched.presynaptic_cell, untouched.permanence), (30, 0.6));
        // The segments grown on A's winners were not matching and keep their permanences.
        for cell in [1, 5, 9] {
            assert!(tm.cells[cell].segments[0]
                .synapses()
                .iter()
                .all(|s| s.permanence == 0.6));
        }
    }

    #[test]
    fn punished_synapses_at_zero_are_removed() {
        let mut tm = expecting_b(0.6);
        let before = tm.num_segments();

        let prediction = tm.predicted_columns();
        tm.step(&set(&[6]), &prediction, true).unwrap();

        for cell in [12, 16, 20] {
            assert!(tm.cells[cell].segments[0].synapses().is_empty());
        }
        // Segments stay in place; only their synapses go.
        assert_eq!(tm.num_segments(), before + 1);
    }

    #[test]
    fn no_punishment_without_learning() {
        let mut tm = expecting_b(0.6);
        let synapses = tm.num_synapses();

        let prediction = tm.predicted_columns();
        tm.step(&set(&[6]), &prediction, false).unwrap();

        assert_eq!(tm.num_synapses(), synapses);
    }

    #[test]
    fn columns_missing_from_the_prediction_burst() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();
        let a = set(&[0, 1, 2]);
        let b = set(&[3, 4, 5]);

        tm.step(&a, &ColumnSet::new(), true).unwrap();
        tm.step(&b, &ColumnSet::new(), true).unwrap();
        tm.step(&a, &ColumnSet::new(), true).unwrap();

        let step = tm.step(&b, &ColumnSet::new(), false).unwrap();
        assert_eq!(step.bursting_columns, b);
    }

    #[test]
    fn no_learning_means_no_growth() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();

        for _ in 0..5 {
            tm.step(&set(&[0, 1]), &ColumnSet::new(), false).unwrap();
            tm.step(&set(&[2, 3]), &ColumnSet::new(), false).unwrap();
        }

        assert_eq!(tm.num_segments(), 0);
    }

    #[test]
    fn out_of_range_column_is_rejected_untouched() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();
        tm.step(&set(&[0]), &ColumnSet::new(), true).unwrap();
        let before = tm.clone();

        let err = tm.step(&set(&[2, 9]), &ColumnSet::new(), true).unwrap_err();

        assert!(matches!(err, HtmError::ColumnOutOfRange { column: 9, num_columns: 8 }));
        assert_eq!(tm, before);
    }

    #[test]
    fn decay_is_bounded_per_update() {
        let p = SequenceMemoryParams {
            max_decayed_synapses: 2,
            ..params()
        };
        let mut tm = SequenceMemory::new(4, 2, p).unwrap();
        tm.cells[0].segments.push(Segment {
            synapses: (2..7)
                .map(|presynaptic_cell| Synapse {
                    presynaptic_cell,
                    permanence: 0.5,
                })
                .collect(),
            last_used: 0,
        });
        let mut prev_active = vec![false; 8];
        prev_active[6] = true;

        tm.adapt_segment(SegmentRef { cell: 0, segment: 0 }, &prev_active);

        let perms: Vec<f32> = tm.cells[0].segments[0]
            .synapses
            .iter()
            .map(|s| s.permanence)
            .collect();
        let expected = [0.45, 0.45, 0.5, 0.5, 0.6];
        assert_eq!(perms.len(), expected.len());
        for (got, want) in perms.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{perms:?}");
        }
    }

    #[test]
    fn segment_count_is_capped_per_cell() {
        let p = SequenceMemoryParams {
            max_segments_per_cell: 1,
            ..params()
        };
        let mut tm = SequenceMemory::new(4, 1, p).unwrap();

        for i in 0..20 {
            let col = i % 4;
            tm.step(&set(&[col]), &ColumnSet::new(), true).unwrap();
        }

        assert!(tm.num_segments() <= 4);
        assert!(tm.cells.iter().all(|c| c.segments.len() <= 1));
    }

    #[test]
    fn synapse_count_is_capped_per_segment() {
        let p = SequenceMemoryParams {
            new_synapse_count: 10,
            max_synapses_per_segment: 4,
            ..params()
        };
        let mut tm = SequenceMemory::new(16, 1, p).unwrap();
        let wide = set(&(0..10).collect::<Vec<_>>());

        tm.step(&wide, &ColumnSet::new(), true).unwrap();
        tm.step(&set(&[12]), &ColumnSet::new(), true).unwrap();

        let segments = tm.cells[12].segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].synapses().len(), 4);
    }

    #[test]
    fn identical_state_gives_identical_steps() {
        let mut tm = SequenceMemory::new(8, 4, params()).unwrap();
        for cols in [[0, 1, 2], [3, 4, 5], [0, 1, 2]] {
            let prediction = tm.predicted_columns();
            tm.step(&set(&cols), &prediction, true).unwrap();
        }
        let mut twin = tm.clone();
        let prediction = tm.predicted_columns();

        let a = tm.step(&set(&[3, 4, 5]), &prediction, true).unwrap();
        let b = twin.step(&set(&[3, 4, 5]), &prediction, true).unwrap();

        assert_eq!(a, b);
        assert_eq!(tm, twin);
    }
}
