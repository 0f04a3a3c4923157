//! CPU rendition of the brute-force kernel.

use crate::{BruteForceKnn, KnnOutput, Result, Shape};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Runs the brute-force scan on the host.
///
/// Produces bit-identical output to [`crate::WgpuKnn`]: both compute `max_j |r_j - q_j|` in `f32`
/// and insert candidates into the same sorted buffer, so ties go to the lower reference index.
pub struct HostKnn;

impl BruteForceKnn for HostKnn {
    #[allow(clippy::cast_possible_truncation)]
    fn knn(&self, reference: &[f32], query: &[f32], dim: usize, k: usize) -> Result<KnnOutput> {
        let shape = Shape::resolve(reference, query, dim, k)?;
        let Shape {
            n_ref, n_query, ..
        } = shape;

        let mut dist = vec![f32::INFINITY; shape.output_len()].into_boxed_slice();
        let mut ind = vec![0u32; shape.output_len()].into_boxed_slice();

        for q in 0..n_query {
            let mut filled = 0;
            for r in 0..n_ref {
                let d = (0..dim)
                    .map(|j| (reference[j * n_ref + r] - query[j * n_query + q]).abs())
                    .fold(0.0, f32::max);
                if filled == k && d >= dist[(k - 1) * n_query + q] {
                    continue;
                }

                // shift worse candidates down one slot
                let mut slot = if filled < k { filled } else { k - 1 };
                while slot > 0 && dist[(slot - 1) * n_query + q] > d {
                    dist[slot * n_query + q] = dist[(slot - 1) * n_query + q];
                    ind[slot * n_query + q] = ind[(slot - 1) * n_query + q];
                    slot -= 1;
                }
                dist[slot * n_query + q] = d;
                // `Shape::resolve` guarantees `n_ref` fits in a u32
                ind[slot * n_query + q] = r as u32 + 1;
                if filled < k {
                    filled += 1;
                }
            }
        }

        Ok(KnnOutput { dist, ind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn one_dimension() {
        // reference points 0, 2, 4, 6 along a line
        let reference = [0.0, 2.0, 4.0, 6.0];
        let query = [4.5, -1.0];
        let out = HostKnn.knn(&reference, &query, 1, 2).unwrap();

        // row 0: nearest neighbor of each query, row 1: second nearest
        assert_eq!(&*out.ind, &[3, 1, 4, 2]);
        assert_eq!(&*out.dist, &[0.5, 1.0, 1.5, 3.0]);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn dimension_major_layout() {
        // reference points (0, 0), (1, 5), (3, 1) stored as xs then ys
        let reference = [0.0, 1.0, 3.0, 0.0, 5.0, 1.0];
        // query (2.5, 1.5)
        let query = [2.5, 1.5];
        let out = HostKnn.knn(&reference, &query, 2, 3).unwrap();

        assert_eq!(&*out.ind, &[3, 1, 2]);
        assert_eq!(&*out.dist, &[0.5, 2.5, 3.5]);
    }

    #[test]
    fn ties_prefer_lower_index() {
        let reference = [1.0, -1.0, 1.0, 0.0];
        let query = [0.0];
        let out = HostKnn.knn(&reference, &query, 1, 4).unwrap();
        assert_eq!(&*out.ind, &[4, 1, 2, 3]);
    }

    #[test]
    fn empty_query() {
        let out = HostKnn.knn(&[0.0, 1.0], &[], 1, 1).unwrap();
        assert!(out.dist.is_empty());
        assert!(out.ind.is_empty());
    }

    #[test]
    fn invalid_k() {
        assert!(HostKnn.knn(&[0.0, 1.0], &[0.5], 1, 3).is_err());
    }
}
