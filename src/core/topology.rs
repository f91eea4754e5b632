//! Topology represents an N-dimensional space through a list of dimensions and corresponding stride values.
//! The struct provides methods to convert between linear indices and coordinates in this N-dimensional space,
//! and also offers a way to iterate over neighborhoods of that space within a radius of a given center index.
//!
//! Both the input space and the column space of the `ColumnPool` are N-dimensional.
//! Potential pools are drawn from a neighborhood of the input space, and local inhibition and
//! boosting compare a column against its neighborhood in the column space.

use serde::{Deserialize, Serialize};
use std::cmp::{max, min};

/// Represents the shape of an N-dimensional space, along with precomputed stride values for
/// linear index conversions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Topology {
    /// Creates a new `Topology` from a slice of dimension sizes.
    #[inline]
    pub fn new(dimensions: &[usize]) -> Self {
        let dims = dimensions.to_vec();
        let strides = Self::strides(&dims);

        Self { dims, strides }
    }

    /// Computes the stride values for each dimension in a given slice of dimension sizes.
    #[inline]
    fn strides(dims: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; dims.len()];

        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }

        strides
    }

    /// The size of each dimension.
    #[inline]
    pub fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    /// Total number of elements in the space.
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Converts a linear index into its coordinates, one per dimension, in order.
    #[inline]
    pub fn coordinates(&self, index: usize) -> Vec<usize> {
        let mut remainder = index;

        self.strides
            .iter()
            .map(|&stride| {
                let coord = remainder / stride;
                remainder %= stride;
                coord
            })
            .collect()
    }

    /// Converts a set of coordinates to a single linear index.
    #[inline]
    pub fn index_from_coordinates(&self, coords: &[usize]) -> usize {
        coords.iter().zip(&self.strides).map(|(&c, &s)| c * s).sum()
    }

    /// Upper bound on the number of elements any neighborhood of `radius` can hold.
    #[inline]
    pub fn max_neighborhood_size(&self, radius: usize) -> usize {
        self.dims
            .iter()
            .map(|&dim| min(2 * radius + 1, dim))
            .product()
    }

    /// Returns an iterator over the neighborhood of indices within a given `radius` of the
    /// specified `center` index. If `wrapping` is true, the neighborhood wraps around edges of
    /// the topology dimensions; otherwise, it is clipped at boundaries.
    ///
    /// A wrapping neighborhood never visits the same index twice: its span along each
    /// dimension is capped at the size of that dimension.
    #[inline]
    pub fn neighborhood(&self, center: usize, radius: usize, wrapping: bool) -> NeighborhoodIter<'_> {
        let center_coords = self.coordinates(center);
        let radius = radius as isize;

        let bounds: Vec<(isize, isize)> = center_coords
            .iter()
            .zip(&self.dims)
            .map(|(&c, &dim)| {
                let c = c as isize;
                let dim = dim as isize;

                if wrapping {
                    (c - radius, min(c + radius + 1, c - radius + dim))
                } else {
                    (max(c - radius, 0), min(c + radius + 1, dim))
                }
            })
            .collect();

        let current = bounds.iter().map(|&(low, _)| low).collect();
        let remaining = bounds
            .iter()
            .map(|&(low, high)| (high - low).max(0) as usize)
            .product();

        NeighborhoodIter {
            topology: self,
            bounds,
            current: Some(current),
            remaining,
            wrapping,
        }
    }
}

/// An iterator that yields all valid indices within a neighborhood of a central index in the `Topology`.
pub struct NeighborhoodIter<'a> {
    topology: &'a Topology,
    bounds: Vec<(isize, isize)>,
    current: Option<Vec<isize>>,
    remaining: usize,
    wrapping: bool,
}

impl Iterator for NeighborhoodIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.as_mut()?;

        let coords: Vec<usize> = current
            .iter()
            .enumerate()
            .map(|(i, &val)| {
                let dim = self.topology.dims[i] as isize;

                if self.wrapping {
                    val.rem_euclid(dim) as usize
                } else {
                    val.clamp(0, dim - 1) as usize
                }
            })
            .collect();

        let result = self.topology.index_from_coordinates(&coords);
        self.remaining = self.remaining.saturating_sub(1);

        for i in (0..current.len()).rev() {
            if current[i] + 1 < self.bounds[i].1 {
                current[i] += 1;

                current
                    .iter_mut()
                    .enumerate()
                    .skip(i + 1)
                    .for_each(|(j, item)| *item = self.bounds[j].0);

                return Some(result);
            }
        }

        self.current.take();

        Some(result)
    }

    /// Exact: the number of indices not yet yielded.
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_round_trip_through_strides() {
        let topology = Topology::new(&[4, 5, 6]);

        assert_eq!(topology.num_elements(), 120);
        assert_eq!(topology.coordinates(0), vec![0, 0, 0]);
        assert_eq!(topology.coordinates(37), vec![1, 1, 1]);
        assert_eq!(topology.index_from_coordinates(&[3, 4, 5]), 119);
    }

    #[test]
    fn clipped_neighborhood_stops_at_edges() {
        let topology = Topology::new(&[10]);
        let hood: Vec<usize> = topology.neighborhood(1, 2, false).collect();

        assert_eq!(hood, vec![0, 1, 2, 3]);
    }

    #[test]
    fn wrapping_neighborhood_wraps_without_duplicates() {
        let topology = Topology::new(&[10]);
        let hood: Vec<usize> = topology.neighborhood(0, 2, true).collect();
        assert_eq!(hood, vec![8, 9, 0, 1, 2]);

        let mut whole: Vec<usize> = topology.neighborhood(3, 20, true).collect();
        assert_eq!(whole.len(), 10);
        whole.sort_unstable();
        whole.dedup();
        assert_eq!(whole.len(), 10);
    }

    #[test]
    fn two_dimensional_neighborhood() {
        let topology = Topology::new(&[3, 3]);
        let mut hood: Vec<usize> = topology.neighborhood(4, 1, false).collect();
        hood.sort_unstable();

        assert_eq!(hood, (0..9).collect::<Vec<_>>());
        assert_eq!(topology.neighborhood(0, 1, false).count(), 4);
        assert_eq!(topology.max_neighborhood_size(1), 9);
    }
}
