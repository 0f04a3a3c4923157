use ndarray::{Array2, ArrayView1};

#[derive(Clone, Debug, PartialEq)]
/// The `k` nearest reference points of every query point.
///
/// Row `q` of both matrices describes query point `q`. Within a row, entries are sorted by
/// ascending distance; `indices` are 0-based rows of the reference set.
pub struct Neighbors<A> {
    /// Chebyshev distances, shape `(n_q, k)`.
    pub distances: Array2<A>,
    /// Reference-set row indices, shape `(n_q, k)`.
    pub indices: Array2<usize>,
}

impl<A: Copy> Neighbors<A> {
    #[must_use]
    pub fn n_queries(&self) -> usize {
        self.indices.nrows()
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.indices.ncols()
    }

    #[must_use]
    /// Distance from every query point to its single nearest neighbor.
    ///
    /// # Panics
    ///
    /// Panics if `k` is zero, which no query function produces.
    pub fn nearest_distances(&self) -> ArrayView1<'_, A> {
        self.distances.column(0)
    }

    /// The `(distance, index)` pairs of query point `q`, nearest first.
    ///
    /// # Panics
    ///
    /// Panics if `q` is out of bounds.
    pub fn row(&self, q: usize) -> impl Iterator<Item = (A, usize)> + '_ {
        self.distances
            .row(q)
            .into_iter()
            .copied()
            .zip(self.indices.row(q).into_iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn accessors() {
        let n = Neighbors {
            distances: array![[0.0, 0.5], [0.25, 1.0], [0.0, 0.0]],
            indices: array![[3, 1], [0, 2], [2, 4]],
        };
        assert_eq!(n.n_queries(), 3);
        assert_eq!(n.k(), 2);
        assert_eq!(n.nearest_distances().to_vec(), vec![0.0, 0.25, 0.0]);
        assert_eq!(n.row(1).collect::<Vec<_>>(), vec![(0.25, 0), (1.0, 2)]);
    }
}
